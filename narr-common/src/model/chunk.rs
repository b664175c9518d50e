//! Chunk identity, lifecycle state machine, and per-attempt history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::validation::{FailureReason, RemediationAction, RemediationTrigger, ValidationResult};

/// Stable chunk identifier, derived from the segment's position in the source
///
/// Ordering on this type is the only ordering used for reassembly. Completion
/// order and loop position never stand in for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u32);

impl ChunkId {
    /// File-name friendly zero-padded form (`000042`)
    pub fn padded(self) -> String {
        format!("{:06}", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChunkId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Upstream chunk descriptor as produced by the chunking collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub chunk_id: ChunkId,
    pub text: String,
    /// Optional per-chunk voice override
    #[serde(default)]
    pub voice: Option<String>,
    /// Optional per-chunk engine override
    #[serde(default)]
    pub engine: Option<String>,
}

/// Chunk processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Synthesizing,
    Validating,
    Retrying,
    Succeeded,
    Failed,
}

impl ChunkStatus {
    /// Terminal chunks are skipped on resume
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Statuses that only exist while a worker holds the chunk
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Synthesizing | Self::Validating | Self::Retrying)
    }

    /// Allowed transitions
    ///
    /// `pending → synthesizing → validating → {succeeded | retrying → synthesizing | failed}`.
    /// Engine failures go straight from synthesizing to retrying or failed.
    /// Returning to pending is allowed from in-flight states (crash recovery)
    /// and from failed (explicit operator reset). Succeeded is final.
    pub fn can_transition_to(self, next: ChunkStatus) -> bool {
        use ChunkStatus::*;
        match (self, next) {
            (Pending, Synthesizing) => true,
            (Synthesizing, Validating | Retrying | Failed) => true,
            (Validating, Succeeded | Retrying | Failed) => true,
            (Retrying, Synthesizing) => true,
            (Synthesizing | Validating | Retrying, Pending) => true,
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Synthesizing => "synthesizing",
            Self::Validating => "validating",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a single synthesis attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Audio was produced, mastered, and validated
    Validated { result: ValidationResult },
    /// The engine did not produce usable audio
    EngineFailed { transient: bool, message: String },
}

/// One synthesis attempt (every attempt is retained for audit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt index within the chunk
    pub attempt_index: u32,
    pub engine: String,
    pub voice: Option<String>,
    /// Generic parameter bag the adapter received
    pub parameters: BTreeMap<String, f64>,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Remediation applied between two attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Attempt whose failure triggered this remediation
    pub attempt_index: u32,
    pub trigger: RemediationTrigger,
    pub action: RemediationAction,
    /// Set once the following attempt has been evaluated
    pub improved: Option<bool>,
}

/// Why a chunk ended in `failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    Validation { reason: FailureReason },
    Engine { message: String, permanent: bool },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { reason } => write!(f, "validation: {}", reason),
            Self::Engine { message, permanent } => {
                let kind = if *permanent { "permanent" } else { "transient" };
                write!(f, "engine ({}): {}", kind, message)
            }
        }
    }
}

/// Unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub text: String,
    /// SHA-256 of `text`, used to detect a different document on resume
    pub text_sha256: String,
    pub voice: Option<String>,
    pub engine: Option<String>,
    pub expected_duration_secs: f64,
    pub status: ChunkStatus,
    pub attempt_count: u32,
    pub last_validation: Option<ValidationResult>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub retry_history: Vec<RetryAttempt>,
    pub final_failure: Option<FailureCause>,
    /// Mastered artifact relative to the job root
    pub audio_path: Option<PathBuf>,
    pub audio_duration_secs: Option<f64>,
    /// Parameters that produced the committed audio
    #[serde(default)]
    pub final_parameters: BTreeMap<String, f64>,
    pub final_engine: Option<String>,
    #[serde(default)]
    pub reset_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    /// Create a pending chunk from an upstream descriptor
    pub fn from_descriptor(descriptor: &ChunkDescriptor, expected_duration_secs: f64) -> Self {
        Self {
            chunk_id: descriptor.chunk_id,
            text: descriptor.text.clone(),
            text_sha256: text_digest(&descriptor.text),
            voice: descriptor.voice.clone(),
            engine: descriptor.engine.clone(),
            expected_duration_secs,
            status: ChunkStatus::Pending,
            attempt_count: 0,
            last_validation: None,
            attempts: Vec::new(),
            retry_history: Vec::new(),
            final_failure: None,
            audio_path: None,
            audio_duration_secs: None,
            final_parameters: BTreeMap::new(),
            final_engine: None,
            reset_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids
    pub fn transition_to(&mut self, next: ChunkStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::Error::InvalidInput(format!(
                "chunk {}: illegal transition {} -> {}",
                self.chunk_id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Return a terminal `failed` chunk to `pending` for re-processing
    ///
    /// Attempt counters restart; history is kept.
    pub fn reset(&mut self) -> crate::Result<()> {
        if self.status != ChunkStatus::Failed {
            return Err(crate::Error::InvalidInput(format!(
                "chunk {} is {}, only failed chunks can be reset",
                self.chunk_id, self.status
            )));
        }
        self.transition_to(ChunkStatus::Pending)?;
        self.attempt_count = 0;
        self.final_failure = None;
        self.reset_count += 1;
        Ok(())
    }

    /// Attempts since the last explicit reset
    pub fn current_attempts(&self) -> impl Iterator<Item = &AttemptRecord> {
        let skip = self.attempts.len().saturating_sub(self.attempt_count as usize);
        self.attempts.iter().skip(skip)
    }

    /// Remediations since the last explicit reset
    ///
    /// Every attempt but the last of a window leads to one remediation.
    pub fn current_retries(&self) -> impl Iterator<Item = &RetryAttempt> {
        let window = self.attempt_count.saturating_sub(1) as usize;
        let skip = self.retry_history.len().saturating_sub(window);
        self.retry_history.iter().skip(skip)
    }
}

/// Hex SHA-256 of chunk text
pub fn text_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
