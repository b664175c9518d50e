//! Job summary report

use std::fmt;

use narr_common::model::{
    AttemptOutcome, AttemptRecord, ChunkId, ChunkStatus, FailureCause, RetryAttempt, StateRecord,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final reason and history of one failed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedChunkReport {
    pub chunk_id: ChunkId,
    pub final_failure: Option<FailureCause>,
    pub attempt_count: u32,
    /// Explicit resets before the current attempt window
    pub resets: u32,
    /// Attempts and remediations since the last reset
    pub attempts: Vec<AttemptRecord>,
    pub retry_history: Vec<RetryAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub engine: String,
    pub revision: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub total_attempts: u64,
    pub runs: usize,
    /// In chunk order
    pub failed_chunks: Vec<FailedChunkReport>,
}

impl JobSummary {
    pub fn from_record(record: &StateRecord) -> Self {
        let stats = &record.metadata.stats;
        let failed_chunks = record
            .chunks
            .values()
            .filter(|c| c.status == ChunkStatus::Failed)
            .map(|c| FailedChunkReport {
                chunk_id: c.chunk_id,
                final_failure: c.final_failure.clone(),
                attempt_count: c.attempt_count,
                resets: c.reset_count,
                attempts: c.current_attempts().cloned().collect(),
                retry_history: c.current_retries().cloned().collect(),
            })
            .collect();
        Self {
            job_id: record.metadata.job_id,
            engine: record.metadata.engine.clone(),
            revision: record.metadata.revision,
            total: stats.total,
            succeeded: stats.succeeded,
            failed: stats.failed,
            pending: stats.pending + stats.in_flight,
            total_attempts: stats.total_attempts,
            runs: record.metadata.runs.len(),
            failed_chunks,
        }
    }

    /// Ids to pass to `reset` for targeted re-processing
    pub fn failed_ids(&self) -> Vec<ChunkId> {
        self.failed_chunks.iter().map(|f| f.chunk_id).collect()
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Job {} (engine {}, revision {})", self.job_id, self.engine, self.revision)?;
        writeln!(
            f,
            "  chunks: {} total, {} succeeded, {} failed, {} pending",
            self.total, self.succeeded, self.failed, self.pending
        )?;
        writeln!(f, "  attempts: {} over {} run(s)", self.total_attempts, self.runs)?;
        for failed in &self.failed_chunks {
            let cause = failed
                .final_failure
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            write!(
                f,
                "  chunk {}: {} after {} attempt(s)",
                failed.chunk_id, cause, failed.attempt_count
            )?;
            if failed.resets > 0 {
                write!(f, " since reset #{}", failed.resets)?;
            }
            writeln!(f)?;
            for attempt in &failed.attempts {
                let outcome = match &attempt.outcome {
                    AttemptOutcome::Validated { result } => match result.reason {
                        Some(reason) => format!("{} ({})", reason, result.tier),
                        None => "passed".to_string(),
                    },
                    AttemptOutcome::EngineFailed { message, .. } => format!("engine: {}", message),
                };
                writeln!(
                    f,
                    "    #{} {} voice={} -> {}",
                    attempt.attempt_index,
                    attempt.engine,
                    attempt.voice.as_deref().unwrap_or("-"),
                    outcome
                )?;
            }
            for retry in &failed.retry_history {
                writeln!(f, "    after #{}: {} => {}", retry.attempt_index, retry.trigger, retry.action)?;
            }
        }
        Ok(())
    }
}
