use thiserror;

use crate::extract::ExtractionError;
use crate::store::GameId;
use crate::stream::parser::StreamFailure;

/// The Result type for agent48.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("io error")]
    StdIOError(#[from] std::io::Error),

    #[error("json error")]
    JsonError(#[from] serde_json::Error),

    #[error("{source:?}")]
    AnyhowError {
        #[from]
        source: anyhow::Error,
    },

    #[error("invalid board: {0}")]
    InvalidBoard(String),

    #[error("no game has been started")]
    NotStarted,

    #[error("the game is over, start a new one")]
    GameOver,

    #[error("a move cycle is already in flight")]
    Busy,

    #[error(transparent)]
    Stream(#[from] StreamFailure),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("game not found: {0}")]
    GameNotFound(GameId),

    #[error("store writer is no longer running")]
    StoreClosed,
}

impl Error {
    /// Failures a move cycle can be retried after, leaving the game untouched.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Extraction(_) | Self::Busy)
    }
}
