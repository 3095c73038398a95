//! Error type shared by every Chanwarden crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ChanwardenError>;

#[derive(Debug, Error)]
pub enum ChanwardenError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The acting agent lacks the right to restrict/ban members.
    #[error("Insufficient rights: {0}")]
    InsufficientRights(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChanwardenError {
    /// True for the "lacking rights" class of transport failures.
    pub fn is_insufficient_rights(&self) -> bool {
        matches!(self, ChanwardenError::InsufficientRights(_))
    }
}
