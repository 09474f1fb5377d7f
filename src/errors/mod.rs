use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedbagError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Feed errors
    #[error(transparent)]
    Fetch(#[from] FetchError),

    // Ledger errors
    #[error("Failed to persist seen ledger {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Seen ledger {path} is corrupt: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    // Scheduling errors
    #[error("A cycle is already running")]
    CycleInProgress,

    // Delivery client errors from the wallabag library
    #[error("Wallabag error: {0}")]
    Wallabag(#[from] wallabag::WallabagError),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to obtain a feed's entries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Feed temporarily unavailable: {0}")]
    Transient(String),

    #[error("Feed fetch failed: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

pub type FeedbagResult<T> = Result<T, FeedbagError>;
