use chrono::{DateTime, Utc};
use rand::RngCore;

use super::board::{Board, Idx, Score, Tile};
use super::direction::Direction;
use super::legal::{legal_moves, AllowedMoves};
use crate::store::GameId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum GameStatus {
    NotStarted,
    Playing,
    GameOver,
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Playing => write!(f, "playing"),
            Self::GameOver => write!(f, "game over"),
        }
    }
}

/// Applied describes a move that changed the board.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Applied {
    pub(crate) direction: Direction,
    pub(crate) score_delta: Score,
    pub(crate) spawned: Option<(Idx, Tile)>,
    pub(crate) game_over: bool,
}

/// Game represents one 2048 game from its first board to game over.
pub(crate) struct Game {
    id: Option<GameId>,
    rng: Box<dyn RngCore + Send>,
    board: Board,
    score: Score,
    moves: u32,
    game_over: bool,
    started_at: DateTime<Utc>,
    previous_move: Option<Direction>,
}

impl Game {
    /// Initialize a new game with two spawned tiles using the given random number generator.
    pub(crate) fn new(mut rng: impl RngCore + Send + 'static) -> Self {
        let mut board = Board::default();
        board.spawn_tile(&mut rng);
        board.spawn_tile(&mut rng);
        Self::with_board(board, rng)
    }

    pub(crate) fn with_board(board: Board, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            id: None,
            rng: Box::new(rng),
            board,
            score: 0,
            moves: 0,
            game_over: board.is_game_over(),
            started_at: Utc::now(),
            previous_move: None,
        }
    }

    pub(crate) fn id(&self) -> Option<GameId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: GameId) {
        self.id = Some(id);
    }

    pub(crate) fn board(&self) -> Board {
        self.board
    }

    pub(crate) fn score(&self) -> Score {
        self.score
    }

    pub(crate) fn moves(&self) -> u32 {
        self.moves
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn previous_move(&self) -> Option<Direction> {
        self.previous_move
    }

    pub(crate) fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub(crate) fn status(&self) -> GameStatus {
        if self.game_over {
            GameStatus::GameOver
        } else {
            GameStatus::Playing
        }
    }

    pub(crate) fn allowed_moves(&self) -> AllowedMoves {
        legal_moves(&self.board())
    }

    /// shift attempts to move the board in the given direction. Nothing changes, and None is
    /// returned, when the game is over or the move would not change the board.
    pub(crate) fn shift(&mut self, direction: Direction) -> Option<Applied> {
        if self.game_over {
            return None;
        }
        let outcome = self.board.apply_move(direction);
        if !outcome.moved {
            return None;
        }

        let mut board = outcome.board;
        let spawned = board.spawn_tile(&mut *self.rng);
        let game_over = board.is_game_over();

        self.board = board;
        self.score += outcome.score_delta;
        self.moves += 1;
        self.previous_move = Some(direction);
        self.game_over = game_over;

        Some(Applied {
            direction,
            score_delta: outcome.score_delta,
            spawned,
            game_over,
        })
    }
}
