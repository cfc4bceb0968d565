use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use super::{GameRecord, GameStore, MoveRecord};
use crate::engine::board::Tile;
use crate::error::{Error, Result};
use crate::stream::token::TokenUsage;

pub(crate) enum StoreCommand {
    CreateGame {
        board: Vec<Tile>,
        reply: Sender<Result<GameRecord>>,
    },
    RecordMove(MoveRecord),
    RecordUsage(TokenUsage),
}

/// StoreWriter owns a store on a background thread. Writes are queued and applied strictly in
/// the order they were sent; failures are logged there and never reported back to the game.
pub(crate) struct StoreWriter {
    tx: Option<Sender<StoreCommand>>,
    join: Option<JoinHandle<Box<dyn GameStore>>>,
}

impl StoreWriter {
    pub(crate) fn spawn(store: impl GameStore + 'static) -> Result<Self> {
        let (tx, rx) = channel::<StoreCommand>();
        let store: Box<dyn GameStore> = Box::new(store);
        let join = thread::Builder::new()
            .name("store-writer".to_string())
            .spawn(move || run(store, rx))?;
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
        })
    }

    /// Create a game and wait for the store to assign its id.
    pub(crate) fn create_game(&self, board: Vec<Tile>) -> Result<GameRecord> {
        let (reply, rx) = channel();
        self.send(StoreCommand::CreateGame { board, reply })?;
        rx.recv().map_err(|_| Error::StoreClosed)?
    }

    pub(crate) fn record_move(&self, record: MoveRecord) -> Result<()> {
        self.send(StoreCommand::RecordMove(record))
    }

    pub(crate) fn record_usage(&self, usage: TokenUsage) -> Result<()> {
        self.send(StoreCommand::RecordUsage(usage))
    }

    /// Drain every queued write, stop the thread and hand the store back.
    pub(crate) fn shutdown(mut self) -> Result<Box<dyn GameStore>> {
        drop(self.tx.take());
        self.join
            .take()
            .ok_or(Error::StoreClosed)?
            .join()
            .map_err(|_| Error::StoreClosed)
    }

    fn send(&self, command: StoreCommand) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or(Error::StoreClosed)?
            .send(command)
            .map_err(|_| Error::StoreClosed)
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("store writer thread panicked");
            }
        }
    }
}

fn run(mut store: Box<dyn GameStore>, rx: Receiver<StoreCommand>) -> Box<dyn GameStore> {
    while let Ok(command) = rx.recv() {
        match command {
            StoreCommand::CreateGame { board, reply } => {
                let result = store.create_game(board);
                if let Err(e) = &result {
                    log::error!("failed to create game: {e}");
                }
                let _ = reply.send(result);
            }
            StoreCommand::RecordMove(record) => {
                let (game_id, seq) = (record.game_id, record.seq);
                match store.record_move(record) {
                    Ok(true) => log::trace!("stored move {seq} of game {game_id}"),
                    Ok(false) => (),
                    Err(e) => log::error!("failed to store move {seq} of game {game_id}: {e}"),
                }
            }
            StoreCommand::RecordUsage(usage) => {
                if let Err(e) = store.record_usage(usage) {
                    log::error!("failed to store token usage: {e}");
                }
            }
        }
    }
    log::debug!("store writer drained");
    store
}
