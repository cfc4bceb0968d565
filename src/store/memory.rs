use super::{new_game_record, GameRecord, GameStore, LogEntry, MoveRecord, SequenceTable};
use crate::engine::board::Tile;
use crate::error::Result;
use crate::stream::token::TokenUsage;

/// MemoryStore keeps the log in memory; it backs tests and runs without a store file.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    entries: Vec<LogEntry>,
    sequences: SequenceTable,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl GameStore for MemoryStore {
    fn create_game(&mut self, board: Vec<Tile>) -> Result<GameRecord> {
        let record = new_game_record(board)?;
        let entry = LogEntry::game_created(&record);
        self.sequences.observe(&entry);
        self.entries.push(entry);
        Ok(record)
    }

    fn record_move(&mut self, record: MoveRecord) -> Result<bool> {
        if !self.sequences.admit(record.game_id, record.seq)? {
            return Ok(false);
        }
        self.entries.push(LogEntry::moved(record));
        Ok(true)
    }

    fn record_usage(&mut self, usage: TokenUsage) -> Result<()> {
        self.entries.push(LogEntry::usage(usage));
        Ok(())
    }

    fn entries(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries.clone())
    }
}
