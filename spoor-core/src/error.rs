//! Error types for spoor-core

use thiserror::Error;

/// Main error type for the spoor-core library
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

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error: connectivity, timeout, a non-success status, or
    /// a response the dispatcher could not interpret. Always recovered
    /// by leaving the batch queued for the next cycle.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for spoor-core
pub type Result<T> = std::result::Result<T, Error>;
