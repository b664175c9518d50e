//! Common error types for narr

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for narr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across narr crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Writer lock could not be acquired before the timeout elapsed
    #[error("Timed out after {waited_ms}ms waiting for writer lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    /// Current state and every backup failed to parse
    #[error("State at {} is corrupt and no backup could be restored: {detail}", path.display())]
    StateCorrupt { path: PathBuf, detail: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
