use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::{new_game_record, GameRecord, GameStore, LogEntry, MoveRecord, SequenceTable};
use crate::engine::board::Tile;
use crate::error::Result;
use crate::stream::token::TokenUsage;

/// JsonlStore appends one JSON object per line to a log file.
#[derive(Debug)]
pub(crate) struct JsonlStore {
    path: PathBuf,
    out: File,
    sequences: SequenceTable,
    // the last write failed part way, so the file may end in a fragment
    torn: bool,
}

impl JsonlStore {
    /// Open (or create) the log at `path`, replaying existing entries to restore move sequences.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut sequences = SequenceTable::default();
        if path.exists() {
            for entry in read_entries(&path)? {
                sequences.observe(&entry);
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log::info!("opened store {}", path.display());
        Ok(Self {
            path,
            out: file,
            sequences,
            torn: false,
        })
    }

    /// Write `entry` as one line with a single `write_all`. Nothing reaches the file unless the
    /// entry encoded, and a line following a failed write starts on a fresh line.
    fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let mut line = Vec::new();
        if self.torn {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, entry)?;
        line.push(b'\n');
        if let Err(e) = self.out.write_all(&line) {
            self.torn = true;
            return Err(e.into());
        }
        self.torn = false;
        Ok(())
    }
}

pub(crate) fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            // a torn final write should not make the whole log unreadable
            Err(e) => log::warn!("{}:{}: skipping unreadable entry: {e}", path.display(), n + 1),
        }
    }
    Ok(entries)
}

impl GameStore for JsonlStore {
    fn create_game(&mut self, board: Vec<Tile>) -> Result<GameRecord> {
        let record = new_game_record(board)?;
        let entry = LogEntry::game_created(&record);
        self.append(&entry)?;
        self.sequences.observe(&entry);
        Ok(record)
    }

    fn record_move(&mut self, record: MoveRecord) -> Result<bool> {
        let (game_id, seq) = (record.game_id, record.seq);
        if !self.sequences.check(game_id, seq)? {
            return Ok(false);
        }
        self.append(&LogEntry::moved(record))?;
        self.sequences.commit(game_id, seq);
        Ok(true)
    }

    fn record_usage(&mut self, usage: TokenUsage) -> Result<()> {
        self.append(&LogEntry::usage(usage))
    }

    fn entries(&self) -> Result<Vec<LogEntry>> {
        read_entries(&self.path)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::super::test_support::move_record;
    use super::*;

    #[test]
    fn reopen_restores_sequences() {
        let file = NamedTempFile::new().unwrap();

        let game_id = {
            let mut store = JsonlStore::open(file.path()).unwrap();
            let game = store.create_game(vec![0; 16]).unwrap();
            assert!(store.record_move(move_record(game.game_id, 1, 4)).unwrap());
            assert!(store.record_move(move_record(game.game_id, 2, 8)).unwrap());
            game.game_id
        };

        let mut store = JsonlStore::open(file.path()).unwrap();
        assert!(!store.record_move(move_record(game_id, 2, 8)).unwrap());
        assert!(store.record_move(move_record(game_id, 3, 16)).unwrap());
        store
            .record_usage(TokenUsage {
                model: "reasoner".to_string(),
                input_tokens: 5,
                ..Default::default()
            })
            .unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 5);
        assert!(matches!(entries[0], LogEntry::GameCreated { .. }));
        assert!(matches!(entries[3], LogEntry::Move { seq: 3, score: 16, .. }));
        assert!(matches!(entries[4], LogEntry::Usage { .. }));
    }

    #[test]
    fn skips_torn_lines() {
        let file = NamedTempFile::new().unwrap();
        {
            let mut store = JsonlStore::open(file.path()).unwrap();
            store.create_game(vec![0; 16]).unwrap();
        }
        let mut raw = OpenOptions::new().append(true).open(file.path()).unwrap();
        write!(raw, "{{\"kind\":\"move\",\"game_").unwrap();
        raw.flush().unwrap();

        let entries = read_entries(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_does_not_record_the_sequence() {
        let file = NamedTempFile::new().unwrap();
        let mut store = JsonlStore::open(file.path()).unwrap();
        let game_id = store.create_game(vec![0; 16]).unwrap().game_id;

        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
        let good = std::mem::replace(&mut store.out, full);
        assert!(store.record_move(move_record(game_id, 1, 4)).is_err());

        store.out = good;
        assert!(store.record_move(move_record(game_id, 1, 4)).unwrap());
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[1], LogEntry::Move { seq: 1, .. }));
    }

    #[test]
    fn append_after_torn_write_starts_a_new_line() {
        let file = NamedTempFile::new().unwrap();
        let mut store = JsonlStore::open(file.path()).unwrap();
        let game_id = store.create_game(vec![0; 16]).unwrap().game_id;

        store.out.write_all(b"{\"kind\":\"move\",\"game_").unwrap();
        store.torn = true;
        assert!(store.record_move(move_record(game_id, 1, 4)).unwrap());
        assert!(!store.torn);

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[1], LogEntry::Move { seq: 1, score: 4, .. }));
    }
}
