//! Error types for narr-synth

use std::fmt;
use thiserror::Error;

/// Class of a transient engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Attempt exceeded the per-chunk timeout
    Timeout,
    /// Out of memory, device busy, or similar
    ResourceExhausted,
    /// Engine process crashed or produced unusable output
    Unavailable,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::ResourceExhausted => f.write_str("resource_exhausted"),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Synthesis failure raised by an engine adapter
///
/// Transient failures go through the normal retry path. Permanent failures
/// (invalid input, unknown voice, missing engine) end the chunk.
#[derive(Debug, Clone, Error)]
pub enum EngineFailure {
    #[error("transient engine failure ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    #[error("permanent engine failure: {message}")]
    Permanent { message: String },
}

impl EngineFailure {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message } => message,
        }
    }
}

/// Transcription backend failure
///
/// Tier 2/3 treat this as a skipped check, never as a chunk failure.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transcriber unavailable: {0}")]
    Unavailable(String),

    #[error("transcriber output unreadable: {0}")]
    BadOutput(String),
}

/// Pipeline-level error
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown engine: {0}")]
    UnknownEngine(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] narr_common::Error),
}

impl From<hound::Error> for SynthError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => SynthError::Io(io),
            other => SynthError::Audio(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for SynthError {
    fn from(e: tokio::task::JoinError) -> Self {
        SynthError::Task(e.to_string())
    }
}

/// Result type for narr-synth operations
pub type SynthResult<T> = Result<T, SynthError>;
