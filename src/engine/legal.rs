use serde::{Deserialize, Serialize};

use super::board::{Board, Idx, BOARD_SIZE};
use super::direction::Direction;

/// AllowedMoves records which directions would change a given board. It is always derived from a
/// board via `legal_moves` and never edited by hand.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct AllowedMoves {
    pub(crate) up: bool,
    pub(crate) down: bool,
    pub(crate) left: bool,
    pub(crate) right: bool,
}

impl AllowedMoves {
    pub(crate) fn get(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    #[cfg(test)]
    pub(crate) fn any(&self) -> bool {
        self.up || self.down || self.left || self.right
    }

    /// Legal directions in `Direction::ALL` order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL.into_iter().filter(|d| self.get(*d))
    }
}

impl std::fmt::Display for AllowedMoves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let legal = self.iter().map(|d| d.as_str()).collect::<Vec<_>>();
        if legal.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", legal.join(", "))
        }
    }
}

pub(crate) fn legal_moves(board: &Board) -> AllowedMoves {
    AllowedMoves {
        up: can_move(board, Direction::Up),
        down: can_move(board, Direction::Down),
        left: can_move(board, Direction::Left),
        right: can_move(board, Direction::Right),
    }
}

/// A direction is legal iff some tile has an empty or equal neighbour on the side it would move
/// toward.
fn can_move(board: &Board, direction: Direction) -> bool {
    for y in 0..BOARD_SIZE {
        for x in 0..BOARD_SIZE {
            let current = board.get(&Idx(x, y));
            if current == 0 {
                continue;
            }
            let neighbour = match direction {
                Direction::Left if x > 0 => Idx(x - 1, y),
                Direction::Right if x + 1 < BOARD_SIZE => Idx(x + 1, y),
                Direction::Up if y > 0 => Idx(x, y - 1),
                Direction::Down if y + 1 < BOARD_SIZE => Idx(x, y + 1),
                _ => continue,
            };
            let next = board.get(&neighbour);
            if next == 0 || next == current {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod test {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::*;
    use crate::engine::board::Tile;

    fn random_board(rng: &mut SmallRng) -> Board {
        // bias toward small exponents so that merges and full boards both show up
        let tiles = (0..BOARD_SIZE * BOARD_SIZE)
            .map(|_| match rng.gen_range(0..6) {
                0 => 0,
                e => 1 << e,
            })
            .collect::<Vec<Tile>>();
        Board::from_flat(&tiles).expect("generated board is well formed")
    }

    #[rstest]
    #[case::empty([[0; 4]; 4], AllowedMoves::default())]
    #[case::single_corner(
        [[0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 2]],
        AllowedMoves { up: true, down: false, left: true, right: false },
    )]
    #[case::stuck([[2, 4, 2, 4], [4, 2, 4, 2], [2, 4, 2, 4], [4, 2, 4, 2]], AllowedMoves::default())]
    #[case::horizontal_merge_only(
        [[2, 2, 4, 8], [4, 8, 16, 32], [8, 16, 32, 64], [16, 32, 64, 128]],
        AllowedMoves { up: false, down: false, left: true, right: true },
    )]
    fn oracle(#[case] slots: [[Tile; 4]; 4], #[case] expected: AllowedMoves) {
        assert_eq!(legal_moves(&Board::from_rows(slots)), expected);
    }

    #[test]
    fn agrees_with_engine() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..5_000 {
            let board = random_board(&mut rng);
            let allowed = legal_moves(&board);
            for direction in Direction::ALL {
                assert_eq!(
                    allowed.get(direction),
                    board.apply_move(direction).moved,
                    "{direction} on\n{board}"
                );
            }
        }
    }

    #[test]
    fn game_over_iff_no_legal_moves() {
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..5_000 {
            let board = random_board(&mut rng);
            assert_eq!(board.is_game_over(), !legal_moves(&board).any(), "\n{board}");
        }
    }

    #[test]
    fn display_lists_legal_directions() {
        let allowed = AllowedMoves {
            up: true,
            down: false,
            left: true,
            right: false,
        };
        assert_eq!(allowed.to_string(), "up, left");
        assert_eq!(AllowedMoves::default().to_string(), "none");
    }
}
