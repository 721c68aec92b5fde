//! Error types for trackline-core

use thiserror::Error;

/// Main error type for the trackline-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local persistence is unavailable or corrupt
    #[error("storage failure: {0}")]
    Storage(String),

    /// Network unreachable or the request never produced a response
    #[error("transport failure: {0}")]
    Transport(String),

    /// Server answered with a non-2xx status
    #[error("server rejected request ({status}): {body}")]
    ServerRejection { status: u16, body: String },

    /// Payload cannot be encoded into a request body
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// Record reached the configured number of delivery attempts
    #[error("event {id} exhausted after {attempts} attempt(s)")]
    Exhausted { id: i64, attempts: u32 },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Tracker or scheduler has been shut down
    #[error("tracker has been shut down")]
    Shutdown,
}

impl Error {
    /// True for failures that count as a failed delivery attempt.
    ///
    /// Transport errors and server rejections are not distinguished for
    /// retry purposes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::ServerRejection { .. })
    }
}

/// Result type alias for trackline-core
pub type Result<T> = std::result::Result<T, Error>;
