//! Deterministic Tier 2 sampling

use std::collections::BTreeSet;

use narr_common::ChunkId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chooses which chunks get a transcription check
///
/// The first and last `edge_count` chunks (by id) are always sampled; the
/// rest are drawn with probability `fraction` from an RNG seeded by the job
/// seed and the chunk id, so a resumed job samples the same chunks.
#[derive(Debug, Clone)]
pub struct Sampler {
    seed: u64,
    fraction: f64,
    edges: BTreeSet<ChunkId>,
}

impl Sampler {
    pub fn new(seed: u64, fraction: f64, edge_count: usize, chunk_ids: &[ChunkId]) -> Self {
        let mut ordered = chunk_ids.to_vec();
        ordered.sort();
        ordered.dedup();
        let mut edges: BTreeSet<ChunkId> = ordered.iter().take(edge_count).copied().collect();
        edges.extend(ordered.iter().rev().take(edge_count).copied());
        Self {
            seed,
            fraction: fraction.clamp(0.0, 1.0),
            edges,
        }
    }

    /// Stable seed derived from a job id
    pub fn seed_from_job(job_id: &uuid::Uuid) -> u64 {
        let (hi, lo) = job_id.as_u64_pair();
        hi ^ lo
    }

    pub fn is_sampled(&self, chunk_id: ChunkId) -> bool {
        if self.edges.contains(&chunk_id) {
            return true;
        }
        let mixed = self.seed ^ u64::from(chunk_id.0).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        StdRng::seed_from_u64(mixed).gen_bool(self.fraction)
    }
}
