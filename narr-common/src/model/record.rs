//! Durable job record: chunk map plus job-level metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::chunk::{Chunk, ChunkDescriptor, ChunkId, ChunkStatus};
use crate::{Error, Result};

/// Aggregate counters, recomputed on every commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Synthesis attempts across all chunks since their last reset
    pub total_attempts: u64,
}

/// Summary of one job run (one process invocation over the record)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Chunks that reached a terminal state during this run
    pub chunks_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_attempts: u64,
    pub cancelled: bool,
    /// "autonomous" or "supervised"
    pub tuning_mode: String,
}

impl RunSummary {
    /// Fraction of processed chunks that failed (0.0 when nothing ran)
    pub fn failure_rate(&self) -> f64 {
        if self.chunks_processed == 0 {
            0.0
        } else {
            self.failed as f64 / self.chunks_processed as f64
        }
    }
}

/// Job-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: Uuid,
    /// Default engine for chunks without an override
    pub engine: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every committed transaction
    pub revision: u64,
    pub stats: AggregateStats,
    #[serde(default)]
    pub runs: Vec<RunSummary>,
}

/// Durable representation of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub metadata: JobMetadata,
    /// Keyed by intrinsic chunk id; iteration order is chunk order
    pub chunks: BTreeMap<ChunkId, Chunk>,
}

impl StateRecord {
    /// Create an empty record for a new job
    pub fn new(engine: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            metadata: JobMetadata {
                job_id: Uuid::new_v4(),
                engine: engine.into(),
                created_at: now,
                updated_at: now,
                revision: 0,
                stats: AggregateStats::default(),
                runs: Vec::new(),
            },
            chunks: BTreeMap::new(),
        }
    }

    /// Merge upstream descriptors into the record
    ///
    /// New ids are inserted as pending. An id that already exists must carry
    /// the same text, otherwise the record belongs to a different document.
    /// Returns the number of chunks inserted.
    pub fn merge_descriptors<F>(
        &mut self,
        descriptors: &[ChunkDescriptor],
        estimate_duration: F,
    ) -> Result<usize>
    where
        F: Fn(&str) -> f64,
    {
        let mut inserted = 0;
        for descriptor in descriptors {
            match self.chunks.get(&descriptor.chunk_id) {
                Some(existing) => {
                    if existing.text_sha256 != super::chunk::text_digest(&descriptor.text) {
                        return Err(Error::InvalidInput(format!(
                            "chunk {} text differs from the stored job; refusing to mix documents",
                            descriptor.chunk_id
                        )));
                    }
                }
                None => {
                    let expected = estimate_duration(&descriptor.text);
                    self.chunks
                        .insert(descriptor.chunk_id, Chunk::from_descriptor(descriptor, expected));
                    inserted += 1;
                }
            }
        }
        self.recompute_stats();
        Ok(inserted)
    }

    /// Return chunks left in an in-flight status to pending
    ///
    /// In-flight statuses are never committed by a healthy run, so finding
    /// one means a previous process died holding it.
    pub fn recover_in_flight(&mut self) -> Vec<ChunkId> {
        let mut recovered = Vec::new();
        for chunk in self.chunks.values_mut() {
            if chunk.status.is_in_flight() {
                chunk.status = ChunkStatus::Pending;
                chunk.updated_at = Utc::now();
                recovered.push(chunk.chunk_id);
            }
        }
        if !recovered.is_empty() {
            self.recompute_stats();
        }
        recovered
    }

    /// Pending chunk ids in chunk order
    pub fn pending_ids(&self) -> Vec<ChunkId> {
        self.chunks
            .values()
            .filter(|c| c.status == ChunkStatus::Pending)
            .map(|c| c.chunk_id)
            .collect()
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    pub fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(&id)
    }

    /// Replace a chunk with a worker's finished copy
    pub fn put_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if !self.chunks.contains_key(&chunk.chunk_id) {
            return Err(Error::NotFound(format!("chunk {}", chunk.chunk_id)));
        }
        self.chunks.insert(chunk.chunk_id, chunk);
        Ok(())
    }

    pub fn recompute_stats(&mut self) {
        let mut stats = AggregateStats {
            total: self.chunks.len(),
            ..Default::default()
        };
        for chunk in self.chunks.values() {
            match chunk.status {
                ChunkStatus::Pending => stats.pending += 1,
                ChunkStatus::Succeeded => stats.succeeded += 1,
                ChunkStatus::Failed => stats.failed += 1,
                _ => stats.in_flight += 1,
            }
            stats.total_attempts += u64::from(chunk.attempt_count);
        }
        self.metadata.stats = stats;
    }

    /// Every chunk is terminal
    pub fn is_complete(&self) -> bool {
        self.chunks.values().all(|c| c.status.is_terminal())
    }
}
