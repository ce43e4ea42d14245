//! Error types for crewlog-core

use thiserror::Error;

/// Main error type for the crewlog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error for session logs
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Main session log does not exist under the root
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A single log line exceeded the reader's buffer limit
    #[error("line {line} exceeds the {limit}-byte line limit")]
    LineTooLong { line: usize, limit: usize },

    /// Filesystem watcher error
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type alias for crewlog-core
pub type Result<T> = std::result::Result<T, Error>;
