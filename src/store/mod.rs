//! Durable record of every game and the moves played in it.
//!
//! The log is append-only. Each move carries a per-game sequence number and stores apply
//! last-sequence-wins, so a stale write can never overwrite a newer one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::board::{Score, Tile};
use crate::engine::direction::Direction;
use crate::error::{Error, Result};
use crate::stream::token::TokenUsage;

pub(crate) mod jsonl;
pub(crate) mod memory;
pub(crate) mod writer;

pub(crate) use jsonl::JsonlStore;
pub(crate) use memory::MemoryStore;
pub(crate) use writer::StoreWriter;

/// GameId is the opaque identifier a store assigns to a new game.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct GameId(Uuid);

impl GameId {
    pub(crate) fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GameRecord {
    pub(crate) game_id: GameId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) board: Vec<Tile>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MoveRecord {
    pub(crate) game_id: GameId,
    pub(crate) seq: u64,
    pub(crate) board: Vec<Tile>,
    pub(crate) score: Score,
    pub(crate) direction: Direction,
    pub(crate) completed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum LogEntry {
    GameCreated {
        game_id: GameId,
        created_at: DateTime<Utc>,
        board: Vec<Tile>,
    },
    Move {
        game_id: GameId,
        seq: u64,
        board: Vec<Tile>,
        score: Score,
        direction: Direction,
        completed: bool,
        recorded_at: DateTime<Utc>,
    },
    Usage {
        usage: TokenUsage,
        recorded_at: DateTime<Utc>,
    },
}

impl LogEntry {
    fn game_created(record: &GameRecord) -> Self {
        Self::GameCreated {
            game_id: record.game_id,
            created_at: record.created_at,
            board: record.board.clone(),
        }
    }

    fn moved(record: MoveRecord) -> Self {
        Self::Move {
            game_id: record.game_id,
            seq: record.seq,
            board: record.board,
            score: record.score,
            direction: record.direction,
            completed: record.completed,
            recorded_at: Utc::now(),
        }
    }

    fn usage(usage: TokenUsage) -> Self {
        Self::Usage {
            usage,
            recorded_at: Utc::now(),
        }
    }
}

/// GameStore is the persistence collaborator. It is write-only from the game's point of view;
/// `entries` exists for the stats query.
pub(crate) trait GameStore: Send {
    fn create_game(&mut self, board: Vec<Tile>) -> Result<GameRecord>;

    /// Append a move. Returns false when the record was stale and ignored.
    fn record_move(&mut self, record: MoveRecord) -> Result<bool>;

    fn record_usage(&mut self, usage: TokenUsage) -> Result<()>;

    fn entries(&self) -> Result<Vec<LogEntry>>;
}

// SequenceTable tracks the last applied move sequence of every known game.
#[derive(Debug, Default)]
struct SequenceTable(HashMap<GameId, u64>);

impl SequenceTable {
    fn register(&mut self, game_id: GameId) {
        self.0.entry(game_id).or_insert(0);
    }

    fn observe(&mut self, entry: &LogEntry) {
        match entry {
            LogEntry::GameCreated { game_id, .. } => self.register(*game_id),
            LogEntry::Move { game_id, seq, .. } => {
                let last = self.0.entry(*game_id).or_insert(0);
                *last = (*last).max(*seq);
            }
            LogEntry::Usage { .. } => (),
        }
    }

    /// Decide whether a move with `seq` may be applied, without recording it.
    fn check(&self, game_id: GameId, seq: u64) -> Result<bool> {
        let last = *self.0.get(&game_id).ok_or(Error::GameNotFound(game_id))?;
        if seq <= last {
            log::warn!("ignoring stale move {seq} for game {game_id}, already at {last}");
            return Ok(false);
        }
        Ok(true)
    }

    /// Record `seq` as applied. Only call after `check` admitted it.
    fn commit(&mut self, game_id: GameId, seq: u64) {
        let last = self.0.entry(game_id).or_insert(0);
        *last = (*last).max(seq);
    }

    /// `check` then `commit`, for stores whose write cannot fail.
    fn admit(&mut self, game_id: GameId, seq: u64) -> Result<bool> {
        let admitted = self.check(game_id, seq)?;
        if admitted {
            self.commit(game_id, seq);
        }
        Ok(admitted)
    }
}

fn new_game_record(board: Vec<Tile>) -> Result<GameRecord> {
    if board.len() != crate::engine::board::BOARD_SIZE * crate::engine::board::BOARD_SIZE {
        return Err(Error::InvalidBoard(format!(
            "initial board has {} tiles",
            board.len()
        )));
    }
    Ok(GameRecord {
        game_id: GameId::random(),
        created_at: Utc::now(),
        board,
    })
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn log_entry_json_is_tagged() {
        let game_id = GameId::random();
        let entry = LogEntry::moved(test_support::move_record(game_id, 3, 12));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["kind"], "move");
        assert_eq!(value["direction"], "left");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["game_id"], game_id.to_string());
        let back: LogEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn sequence_table_is_last_sequence_wins() {
        let game_id = GameId::random();
        let mut table = SequenceTable::default();
        assert!(matches!(table.admit(game_id, 1), Err(Error::GameNotFound(_))));
        table.register(game_id);
        assert!(table.admit(game_id, 1).unwrap());
        assert!(table.admit(game_id, 3).unwrap());
        assert!(!table.admit(game_id, 2).unwrap());
        assert!(!table.admit(game_id, 3).unwrap());
        assert!(table.admit(game_id, 4).unwrap());

        assert!(table.check(game_id, 5).unwrap());
        assert!(table.check(game_id, 5).unwrap());
        table.commit(game_id, 5);
        assert!(!table.check(game_id, 5).unwrap());
    }

    #[test]
    fn rejects_short_initial_board() {
        assert!(matches!(new_game_record(vec![0; 3]), Err(Error::InvalidBoard(_))));
    }
}
