use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::IteratorRandom;
use rand::Rng;

use super::direction::Direction;
use crate::error::{Error, Result};

pub(crate) const BOARD_SIZE: usize = 4;

pub(crate) type Tile = u32;

pub(crate) type Score = u32;

type Line = [Tile; BOARD_SIZE];

const NEW_TILE_CHOICES: [Tile; 2] = [2, 4];
const NEW_TILE_WEIGHTS: [u8; 2] = [9, 1];

/// Idx addresses a single slot on the board as (x, y), i.e. (column, row).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub(crate) struct Idx(pub(crate) usize, pub(crate) usize);

impl std::fmt::Display for Idx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({0},{1})", self.0, self.1)
    }
}

impl Idx {
    pub(crate) fn x(&self) -> usize {
        self.0
    }

    pub(crate) fn y(&self) -> usize {
        self.1
    }
}

/// The result of applying a single move to a board, before any tile is spawned.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MoveOutcome {
    pub(crate) board: Board,
    pub(crate) score_delta: Score,
    pub(crate) moved: bool,
}

/// Board is a fixed size grid of tiles. Every tile is either 0 (empty) or a power of two.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub(crate) struct Board {
    slots: [[Tile; BOARD_SIZE]; BOARD_SIZE],
}

// public methods
impl Board {
    #[cfg(test)]
    pub(crate) fn from_rows(slots: [[Tile; BOARD_SIZE]; BOARD_SIZE]) -> Self {
        Self { slots }
    }

    /// Build a board from tiles in row-major order, the layout used on every external interface.
    pub(crate) fn from_flat(tiles: &[Tile]) -> Result<Self> {
        if tiles.len() != BOARD_SIZE * BOARD_SIZE {
            return Err(Error::InvalidBoard(format!(
                "expected {} tiles, got {}",
                BOARD_SIZE * BOARD_SIZE,
                tiles.len()
            )));
        }
        if let Some(bad) = tiles.iter().find(|t| **t != 0 && !t.is_power_of_two()) {
            return Err(Error::InvalidBoard(format!("{bad} is not a power of two")));
        }
        let mut board = Board::default();
        for (i, tile) in tiles.iter().enumerate() {
            board.slots[i / BOARD_SIZE][i % BOARD_SIZE] = *tile;
        }
        Ok(board)
    }

    pub(crate) fn to_flat(&self) -> Vec<Tile> {
        self.slots.iter().flatten().copied().collect()
    }

    pub(crate) fn rows(&self) -> &[[Tile; BOARD_SIZE]; BOARD_SIZE] {
        &self.slots
    }

    pub(crate) fn get(&self, idx: &Idx) -> Tile {
        self.slots[idx.y()][idx.x()]
    }

    pub(crate) fn empty_cells(&self) -> impl Iterator<Item = Idx> + '_ {
        (0..BOARD_SIZE)
            .flat_map(|y| (0..BOARD_SIZE).map(move |x| Idx(x, y)))
            .filter(|idx| self.get(idx) == 0)
    }

    pub(crate) fn max_tile(&self) -> Tile {
        self.slots.iter().flatten().copied().max().unwrap_or(0)
    }

    /// Slide every line toward the edge named by `direction`, merging equal neighbours once.
    ///
    /// Pure: the receiver is left untouched and no tile is spawned.
    pub(crate) fn apply_move(&self, direction: Direction) -> MoveOutcome {
        let mut board = *self;
        let mut score_delta = 0;
        let idxs = Indices::new(direction).collect::<Vec<Idx>>();
        for line_idxs in idxs.chunks(BOARD_SIZE) {
            let mut line: Line = [0; BOARD_SIZE];
            for (slot, idx) in line.iter_mut().zip(line_idxs) {
                *slot = self.get(idx);
            }
            let (collapsed, gained) = collapse(line);
            score_delta += gained;
            for (value, idx) in collapsed.iter().zip(line_idxs) {
                board.set(idx, *value);
            }
        }
        MoveOutcome {
            moved: board != *self,
            board,
            score_delta,
        }
    }

    /// Place a 2 (90%) or a 4 (10%) on a uniformly chosen empty slot. Returns None when the board
    /// is full.
    pub(crate) fn spawn_tile<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<(Idx, Tile)> {
        let idx = self.empty_cells().choose(rng)?;
        let weights = WeightedIndex::new(NEW_TILE_WEIGHTS)
            .expect("NEW_TILE_WEIGHTS should never be empty");
        let value = NEW_TILE_CHOICES[weights.sample(rng)];
        self.set(&idx, value);
        Some((idx, value))
    }

    pub(crate) fn is_game_over(&self) -> bool {
        if self.empty_cells().next().is_some() {
            return false;
        }
        for y in 0..BOARD_SIZE {
            for x in 0..BOARD_SIZE {
                let value = self.slots[y][x];
                if x + 1 < BOARD_SIZE && self.slots[y][x + 1] == value {
                    return false;
                }
                if y + 1 < BOARD_SIZE && self.slots[y + 1][x] == value {
                    return false;
                }
            }
        }
        true
    }
}

// private methods
impl Board {
    fn set(&mut self, idx: &Idx, value: Tile) {
        self.slots[idx.y()][idx.x()] = value;
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for row in &self.slots {
            let cells = row
                .iter()
                .map(|t| match t {
                    0 => format!("{:>5}", "."),
                    t => format!("{:>5}", t),
                })
                .collect::<String>();
            writeln!(f, "{}", cells)?;
        }
        Ok(())
    }
}

/// Collapse one line toward index 0: slide every tile over empty slots, then sweep once from the
/// edge merging equal neighbours. A merged tile is never merged again within the same sweep.
fn collapse(mut line: Line) -> (Line, Score) {
    for i in 1..BOARD_SIZE {
        if line[i] == 0 {
            continue;
        }
        let mut k = i;
        while k > 0 && line[k - 1] == 0 {
            line[k - 1] = line[k];
            line[k] = 0;
            k -= 1;
        }
    }

    let mut gained = 0;
    for i in 0..BOARD_SIZE - 1 {
        if line[i] != 0 && line[i] == line[i + 1] {
            line[i] *= 2;
            gained += line[i];
            // pull the tail forward into the freed slot
            line.copy_within(i + 2.., i + 1);
            line[BOARD_SIZE - 1] = 0;
        }
    }
    (line, gained)
}

// Indices yields every board Idx one line at a time, each line ordered from the edge the tiles
// move toward to the opposite edge.
struct Indices {
    direction: Direction,
    line: usize,
    step: usize,
}

impl Indices {
    fn new(direction: Direction) -> Self {
        Indices {
            direction,
            line: 0,
            step: 0,
        }
    }
}

impl Iterator for Indices {
    type Item = Idx;

    fn next(&mut self) -> Option<Self::Item> {
        if self.line == BOARD_SIZE {
            return None;
        }
        let far = BOARD_SIZE - 1 - self.step;
        let idx = match self.direction {
            Direction::Left => Idx(self.step, self.line),
            Direction::Right => Idx(far, self.line),
            Direction::Up => Idx(self.line, self.step),
            Direction::Down => Idx(self.line, far),
        };
        if self.step == BOARD_SIZE - 1 {
            self.step = 0;
            self.line += 1;
        } else {
            self.step += 1;
        }
        Some(idx)
    }
}
