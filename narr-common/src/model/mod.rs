//! Job model shared by the state store and the synthesis pipeline

mod chunk;
mod record;
mod validation;

pub use chunk::{
    text_digest, AttemptOutcome, AttemptRecord, Chunk, ChunkDescriptor, ChunkId, ChunkStatus,
    FailureCause, RetryAttempt,
};
pub use record::{AggregateStats, JobMetadata, RunSummary, StateRecord};
pub use validation::{
    Evidence, FailureReason, RemediationAction, RemediationTrigger, ValidationResult,
    ValidationTier,
};
