use std::collections::{BTreeMap, HashMap};

use crate::engine::board::{Board, Score, Tile};
use crate::engine::direction::Direction;
use crate::store::{GameId, LogEntry};
use crate::stream::token::TokenUsage;

/// Final scores are grouped into bins this wide.
pub(crate) const SCORE_BUCKET: Score = 1000;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct UsageTotals {
    pub(crate) requests: u64,
    pub(crate) input_tokens: u64,
    pub(crate) output_tokens: u64,
    pub(crate) cache_creation_input_tokens: u64,
    pub(crate) cache_read_input_tokens: u64,
}

impl UsageTotals {
    fn add(&mut self, usage: &TokenUsage) {
        self.requests += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_creation_input_tokens += usage.cache_creation_input_tokens;
        self.cache_read_input_tokens += usage.cache_read_input_tokens;
    }
}

/// Stats aggregates a store log. Only the latest move of each game decides its final score and
/// whether it was completed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Stats {
    pub(crate) games: usize,
    pub(crate) completed: usize,
    /// Lower bound of each score bin to the number of completed games in it.
    pub(crate) scores: BTreeMap<Score, usize>,
    pub(crate) highest_tiles: BTreeMap<Tile, usize>,
    pub(crate) directions: BTreeMap<Direction, usize>,
    pub(crate) usage: UsageTotals,
}

struct Latest {
    seq: u64,
    score: Score,
    max_tile: Tile,
    completed: bool,
}

impl Stats {
    pub(crate) fn from_entries(entries: &[LogEntry]) -> Self {
        let mut stats = Stats::default();
        let mut latest: HashMap<GameId, Option<Latest>> = HashMap::new();

        for entry in entries {
            match entry {
                LogEntry::GameCreated { game_id, .. } => {
                    latest.entry(*game_id).or_insert(None);
                }
                LogEntry::Move {
                    game_id,
                    seq,
                    board,
                    score,
                    direction,
                    completed,
                    ..
                } => {
                    *stats.directions.entry(*direction).or_default() += 1;
                    let slot = latest.entry(*game_id).or_insert(None);
                    if slot.as_ref().map_or(true, |l| *seq > l.seq) {
                        *slot = Some(Latest {
                            seq: *seq,
                            score: *score,
                            max_tile: highest_tile(board),
                            completed: *completed,
                        });
                    }
                }
                LogEntry::Usage { usage, .. } => stats.usage.add(usage),
            }
        }

        stats.games = latest.len();
        for game in latest.values().flatten().filter(|l| l.completed) {
            stats.completed += 1;
            *stats
                .scores
                .entry(game.score / SCORE_BUCKET * SCORE_BUCKET)
                .or_default() += 1;
            *stats.highest_tiles.entry(game.max_tile).or_default() += 1;
        }
        stats
    }
}

fn highest_tile(tiles: &[Tile]) -> Tile {
    match Board::from_flat(tiles) {
        Ok(board) => board.max_tile(),
        Err(e) => {
            log::warn!("ignoring stored board: {e}");
            0
        }
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "games: {} ({} completed)", self.games, self.completed)?;

        writeln!(f, "final scores:")?;
        for (low, count) in &self.scores {
            writeln!(f, "  {:>6}-{:<6} {count}", low, low + SCORE_BUCKET - 1)?;
        }

        writeln!(f, "highest tiles:")?;
        for (tile, count) in &self.highest_tiles {
            writeln!(f, "  {tile:>6} {count}")?;
        }

        writeln!(f, "moves:")?;
        for direction in Direction::ALL {
            let count = self.directions.get(&direction).copied().unwrap_or(0);
            writeln!(f, "  {direction:<6} {count}")?;
        }

        let u = &self.usage;
        writeln!(f, "token usage over {} requests:", u.requests)?;
        writeln!(f, "  input          {}", u.input_tokens)?;
        writeln!(f, "  output         {}", u.output_tokens)?;
        writeln!(f, "  cache creation {}", u.cache_creation_input_tokens)?;
        write!(f, "  cache read     {}", u.cache_read_input_tokens)
    }
}
