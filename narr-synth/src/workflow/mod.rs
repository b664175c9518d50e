//! Job workflow
//!
//! [`JobRunner`] owns the job's state store and drives a [`WorkerPool`];
//! each worker runs [`process_chunk`] for one chunk at a time.

mod chunk_processor;
mod job;
mod worker_pool;

pub use chunk_processor::{
    artifact_relative_path, process_chunk, ChunkOutcome, ProcessorContext, AUDIO_DIR,
};
pub use job::{JobInit, JobRunner, RunOutcome, STATE_DIR};
pub use worker_pool::{LoadProbe, PoolBudget, PoolReport, ProcLoadAvg, WorkerPool};
