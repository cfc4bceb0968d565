//! Per-game session state.
//!
//! A Session owns the current game, the move history shown to the player, and the store writer
//! the game is persisted through. Presentation code only ever sees `SessionView` snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::engine::board::{Board, Score, Tile};
use crate::engine::direction::Direction;
use crate::engine::game::{Applied, Game, GameStatus};
use crate::engine::legal::AllowedMoves;
use crate::error::{Error, Result};
use crate::store::{GameId, GameStore, MoveRecord, StoreWriter};
use crate::stream::parser::Phase;

pub(crate) const DEFAULT_HISTORY_LIMIT: usize = 3;

/// Everything a session reports while it runs, in the order it happens.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SessionEvent {
    GameStarted {
        game_id: Option<GameId>,
        board: Board,
    },
    CycleStarted {
        allowed: AllowedMoves,
    },
    Appended {
        phase: Phase,
        fragment: String,
    },
    Extracting,
    MoveApplied {
        direction: Direction,
        score_delta: Score,
        score: Score,
        board: Board,
    },
    NoOp {
        direction: Direction,
    },
    CycleFailed {
        message: String,
    },
    GameOver {
        score: Score,
        moves: u32,
        max_tile: Tile,
    },
}

/// HistoryEntry is the record of one decision cycle. Text only grows and the direction is set
/// at most once.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct HistoryEntry {
    reasoning: Option<String>,
    answer: Option<String>,
    direction: Option<Direction>,
    error: Option<String>,
}

impl HistoryEntry {
    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub(crate) fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub(crate) fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub(crate) fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub(crate) fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn append(&mut self, phase: Phase, fragment: &str) {
        let buffer = match phase {
            Phase::Reasoning => &mut self.reasoning,
            Phase::Answer => &mut self.answer,
        };
        buffer.get_or_insert_with(String::new).push_str(fragment);
    }

    /// Set the resolved direction. Returns false, leaving the entry untouched, if it was already
    /// resolved.
    pub(crate) fn resolve(&mut self, direction: Direction) -> bool {
        if self.direction.is_some() {
            return false;
        }
        self.direction = Some(direction);
        true
    }
}

/// What the session is doing right now, for progress indicators.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Activity {
    pub(crate) loading: bool,
    pub(crate) thinking: bool,
    pub(crate) answering: bool,
    pub(crate) extracting: bool,
}

/// BusyLatch blocks a second move cycle while one is in flight.
#[derive(Clone, Debug, Default)]
pub(crate) struct BusyLatch(Arc<AtomicBool>);

impl BusyLatch {
    pub(crate) fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the latch when dropped, whichever way the cycle ends.
pub(crate) struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Read-only projection of a session.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SessionView {
    pub(crate) status: GameStatus,
    pub(crate) game_id: Option<GameId>,
    pub(crate) board: Option<Board>,
    pub(crate) score: Score,
    pub(crate) moves: u32,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) previous_move: Option<Direction>,
    pub(crate) allowed: AllowedMoves,
    pub(crate) busy: bool,
    pub(crate) activity: Activity,
    pub(crate) history: Vec<HistoryEntry>,
}

pub(crate) struct Session {
    game: Option<Game>,
    history: Vec<HistoryEntry>,
    history_limit: usize,
    busy: BusyLatch,
    activity: Activity,
    store: StoreWriter,
    events: Option<Sender<SessionEvent>>,
    next_seq: u64,
}

impl Session {
    pub(crate) fn new(store: StoreWriter) -> Self {
        Self {
            game: None,
            history: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            busy: BusyLatch::default(),
            activity: Activity::default(),
            store,
            events: None,
            next_seq: 0,
        }
    }

    pub(crate) fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub(crate) fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    pub(crate) fn status(&self) -> GameStatus {
        self.game
            .as_ref()
            .map_or(GameStatus::NotStarted, |g| g.status())
    }

    pub(crate) fn busy(&self) -> &BusyLatch {
        &self.busy
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub(crate) fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }

    /// Open a new history entry and return its index.
    pub(crate) fn push_entry(&mut self, entry: HistoryEntry) -> usize {
        self.history.push(entry);
        self.history.len() - 1
    }

    pub(crate) fn entry_mut(&mut self, idx: usize) -> Option<&mut HistoryEntry> {
        self.history.get_mut(idx)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // a closed receiver only means nobody is watching
            let _ = events.send(event);
        }
    }

    /// Replace the current game with a fresh one and register it with the store. A store failure
    /// is logged and the game goes on unpersisted.
    pub(crate) fn new_game(&mut self, rng: impl RngCore + Send + 'static) -> Result<()> {
        self.start(Game::new(rng))
    }

    pub(crate) fn start(&mut self, mut game: Game) -> Result<()> {
        if self.busy.is_busy() {
            return Err(Error::Busy);
        }
        match self.store.create_game(game.board().to_flat()) {
            Ok(record) => game.set_id(record.game_id),
            Err(e) => log::warn!("new game will not be persisted: {e}"),
        }
        log::info!(
            "started game {}",
            game.id().map_or("<unsaved>".to_string(), |id| id.to_string())
        );
        self.next_seq = 0;
        self.emit(SessionEvent::GameStarted {
            game_id: game.id(),
            board: game.board(),
        });
        self.game = Some(game);
        Ok(())
    }

    /// Play a direction chosen outside a move cycle, e.g. from the keyboard.
    pub(crate) fn play(&mut self, direction: Direction) -> Result<Option<Applied>> {
        let _busy = self.busy.try_acquire().ok_or(Error::Busy)?;
        self.apply_direction(direction)
    }

    /// Apply a direction to the current game. A direction that would not change the board is
    /// absorbed as a no-op.
    pub(crate) fn apply_direction(&mut self, direction: Direction) -> Result<Option<Applied>> {
        let game = self.game.as_mut().ok_or(Error::NotStarted)?;
        if game.is_game_over() {
            return Err(Error::GameOver);
        }
        let Some(applied) = game.shift(direction) else {
            log::debug!("{direction} does not change the board, ignoring");
            self.emit(SessionEvent::NoOp { direction });
            return Ok(None);
        };

        let (game_id, board, score, moves) = (game.id(), game.board(), game.score(), game.moves());
        log::info!("moved {direction}: +{} (score {score})", applied.score_delta);
        if let Some((idx, tile)) = applied.spawned {
            log::debug!("spawned {tile} at {idx}");
        }
        if let Some(game_id) = game_id {
            self.next_seq += 1;
            let record = MoveRecord {
                game_id,
                seq: self.next_seq,
                board: board.to_flat(),
                score,
                direction,
                completed: applied.game_over,
            };
            if let Err(e) = self.store.record_move(record) {
                log::error!("failed to queue move {} of game {game_id}: {e}", self.next_seq);
            }
        }

        self.emit(SessionEvent::MoveApplied {
            direction,
            score_delta: applied.score_delta,
            score,
            board,
        });
        if applied.game_over {
            log::info!("game over after {moves} moves with score {score}");
            self.emit(SessionEvent::GameOver {
                score,
                moves,
                max_tile: board.max_tile(),
            });
        }
        Ok(Some(applied))
    }

    pub(crate) fn store(&self) -> &StoreWriter {
        &self.store
    }

    pub(crate) fn view(&self) -> SessionView {
        let skip = self.history.len().saturating_sub(self.history_limit);
        let game = self.game.as_ref();
        SessionView {
            status: self.status(),
            game_id: game.and_then(|g| g.id()),
            board: game.map(|g| g.board()),
            score: game.map_or(0, |g| g.score()),
            moves: game.map_or(0, |g| g.moves()),
            started_at: game.map(|g| g.started_at()),
            previous_move: game.and_then(|g| g.previous_move()),
            allowed: game.map_or(AllowedMoves::default(), |g| g.allowed_moves()),
            busy: self.busy.is_busy(),
            activity: self.activity,
            history: self.history[skip..].to_vec(),
        }
    }

    /// Stop the store writer once every queued write has landed and hand the store back.
    pub(crate) fn close(self) -> Result<Box<dyn GameStore>> {
        self.store.shutdown()
    }
}
