//! Bounded-concurrency chunk execution
//!
//! The pool is a weighted semaphore holding [`PERMITS_PER_CPU`] permits per
//! CPU. Each pending chunk becomes a task in a `JoinSet` once the permits for
//! its engine's concurrency cost are free, so a cost-2 engine occupies twice
//! the capacity of a cost-1 engine. Completion order is arbitrary. Each
//! finished chunk is committed in its own transaction on the blocking pool.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use narr_common::{Chunk, ChunkId, ChunkStatus, StateStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::chunk_processor::{process_chunk, ChunkOutcome, ProcessorContext};
use crate::config::PoolConfig;
use crate::error::{SynthError, SynthResult};

/// Permits standing for one CPU; engine costs are converted at this resolution
pub const PERMITS_PER_CPU: u32 = 100;

/// Weighted capacity of the pool
///
/// A chunk holds `cost * PERMITS_PER_CPU` permits, bounded so that between
/// `min_workers` and `max_workers` chunks of any single engine fit at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBudget {
    pub permits: u32,
    min_weight: u32,
    max_weight: u32,
}

impl PoolBudget {
    pub fn new(cpus: usize, config: &PoolConfig) -> Self {
        let permits = u32::try_from(cpus.max(1))
            .unwrap_or(u32::MAX / PERMITS_PER_CPU)
            .saturating_mul(PERMITS_PER_CPU);
        let max_workers = u32::try_from(config.max_workers.max(1)).unwrap_or(u32::MAX);
        let min_workers = u32::try_from(config.min_workers.max(1))
            .unwrap_or(u32::MAX)
            .min(max_workers);
        let min_weight = permits.div_ceil(max_workers).max(1);
        let max_weight = (permits / min_workers).max(min_weight);
        Self {
            permits,
            min_weight,
            max_weight,
        }
    }

    /// Permits held by one chunk on an engine of `cost`
    pub fn weight(&self, cost: f64) -> u32 {
        let cost = if cost > 0.0 { cost } else { 1.0 };
        let raw = (cost * f64::from(PERMITS_PER_CPU)).round().min(f64::from(u32::MAX)) as u32;
        raw.clamp(self.min_weight, self.max_weight)
    }

    /// Chunks that run at once when all of them use an engine of `cost`
    pub fn workers_for(&self, cost: f64) -> usize {
        (self.permits / self.weight(cost)) as usize
    }
}

/// Source of CPU pressure readings
pub trait LoadProbe: Send + Sync {
    /// 1-minute load average divided by CPU count, if available
    fn load_per_cpu(&self) -> Option<f64>;
}

/// Reads `/proc/loadavg` (Linux only; `None` elsewhere)
pub struct ProcLoadAvg {
    cpus: usize,
}

impl ProcLoadAvg {
    pub fn new() -> Self {
        Self {
            cpus: num_cpus::get().max(1),
        }
    }
}

impl Default for ProcLoadAvg {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProbe for ProcLoadAvg {
    fn load_per_cpu(&self) -> Option<f64> {
        let text = std::fs::read_to_string("/proc/loadavg").ok()?;
        let one_minute: f64 = text.split_whitespace().next()?.parse().ok()?;
        Some(one_minute / self.cpus as f64)
    }
}

/// What one pool run did
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    /// Committed chunk ids in completion order
    pub completed: Vec<ChunkId>,
    pub succeeded: usize,
    pub failed: usize,
    /// Attempts made by committed chunks during this run
    pub attempts: u64,
    /// Chunks stopped by cancellation between attempts
    pub interrupted: Vec<ChunkId>,
    /// Chunks whose processing or commit errored; they stay pending
    pub errors: Vec<(ChunkId, String)>,
    pub cancelled: bool,
    /// Permits still in the pool at the end (after any load shedding)
    pub final_permits: u32,
}

pub struct WorkerPool {
    ctx: Arc<ProcessorContext>,
    store: Arc<StateStore>,
    config: PoolConfig,
    budget: PoolBudget,
    probe: Option<Arc<dyn LoadProbe>>,
}

impl WorkerPool {
    pub fn new(
        ctx: Arc<ProcessorContext>,
        store: Arc<StateStore>,
        config: PoolConfig,
        budget: PoolBudget,
    ) -> Self {
        Self {
            ctx,
            store,
            config,
            budget,
            probe: None,
        }
    }

    /// Enable load shedding driven by `probe`
    pub fn with_load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Permits a chunk holds while it is processed, from the cost of the
    /// engine it starts on
    fn chunk_weight(&self, chunk: &Chunk) -> u32 {
        let engine = chunk.engine.as_deref().unwrap_or(&self.ctx.default_engine);
        self.budget.weight(self.ctx.registry.concurrency_cost(engine))
    }

    /// Process `chunks` until all are terminal or `cancel` fires
    ///
    /// After cancellation no new chunk is started; running chunks finish
    /// their current attempt.
    pub async fn run(&self, chunks: Vec<Chunk>, cancel: CancellationToken) -> SynthResult<PoolReport> {
        let semaphore = Arc::new(Semaphore::new(self.budget.permits as usize));
        let active = Arc::new(AtomicU32::new(self.budget.permits));
        let heaviest = chunks
            .iter()
            .map(|c| self.chunk_weight(c))
            .max()
            .unwrap_or(self.budget.permits);
        let monitor_stop = CancellationToken::new();
        let monitor = self.spawn_monitor(&semaphore, &active, heaviest, &monitor_stop);

        info!(
            permits = self.budget.permits,
            heaviest_chunk = heaviest,
            chunks = chunks.len(),
            "Starting worker pool"
        );

        let mut tasks: JoinSet<(ChunkId, SynthResult<ChunkOutcome>)> = JoinSet::new();
        let mut report = PoolReport::default();

        for chunk in chunks {
            if cancel.is_cancelled() {
                break;
            }
            let weight = self.chunk_weight(&chunk);
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_many_owned(weight) => {
                    permit.map_err(|e| SynthError::Task(e.to_string()))?
                }
            };

            let ctx = Arc::clone(&self.ctx);
            let store = Arc::clone(&self.store);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let chunk_id = chunk.chunk_id;
                let result: SynthResult<ChunkOutcome> = async {
                    let outcome = process_chunk(ctx, chunk, cancel).await?;
                    if let ChunkOutcome::Finished(chunk) = &outcome {
                        commit_chunk(store, chunk.clone()).await?;
                    }
                    Ok(outcome)
                }
                .await;
                (chunk_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (chunk_id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Worker task panicked");
                    continue;
                }
            };
            match result {
                Ok(ChunkOutcome::Finished(chunk)) => {
                    report.completed.push(chunk_id);
                    report.attempts += u64::from(chunk.attempt_count);
                    match chunk.status {
                        ChunkStatus::Succeeded => report.succeeded += 1,
                        _ => report.failed += 1,
                    }
                }
                Ok(ChunkOutcome::Interrupted(id)) => report.interrupted.push(id),
                Err(e) => {
                    error!(chunk_id = chunk_id.0, error = %e, "Chunk not committed");
                    report.errors.push((chunk_id, e.to_string()));
                }
            }
        }

        monitor_stop.cancel();
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        report.cancelled = cancel.is_cancelled();
        report.final_permits = active.load(Ordering::SeqCst);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            interrupted = report.interrupted.len(),
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "Worker pool finished"
        );
        Ok(report)
    }

    /// Retire one worker's worth of permits (the heaviest chunk's weight)
    /// after `pressure_samples` consecutive pressured readings, always
    /// leaving room for the heaviest chunk
    fn spawn_monitor(
        &self,
        semaphore: &Arc<Semaphore>,
        active: &Arc<AtomicU32>,
        heaviest: u32,
        stop: &CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.load_monitor || self.budget.permits < heaviest.saturating_mul(2) {
            return None;
        }
        let probe = self.probe.clone()?;
        let semaphore = Arc::clone(semaphore);
        let active = Arc::clone(active);
        let stop = stop.clone();
        let interval = self.config.sample_interval();
        let threshold = self.config.cpu_pressure_threshold;
        let needed = self.config.pressure_samples.max(1);

        Some(tokio::spawn(async move {
            let mut streak = 0u32;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(load) = probe.load_per_cpu() else {
                    continue;
                };
                if load > threshold {
                    streak += 1;
                    debug!(load, streak, "CPU pressure sample");
                } else {
                    streak = 0;
                }
                if streak < needed || active.load(Ordering::SeqCst) < heaviest.saturating_mul(2) {
                    continue;
                }
                streak = 0;
                let permit = tokio::select! {
                    _ = stop.cancelled() => return,
                    permit = Arc::clone(&semaphore).acquire_many_owned(heaviest) => permit,
                };
                if let Ok(permit) = permit {
                    permit.forget();
                    let left = active.fetch_sub(heaviest, Ordering::SeqCst) - heaviest;
                    warn!(load, permits = left, "Sustained CPU pressure, retiring a worker");
                }
            }
        }))
    }
}

/// Commit one finished chunk in its own transaction
async fn commit_chunk(store: Arc<StateStore>, chunk: Chunk) -> SynthResult<()> {
    let chunk_id = chunk.chunk_id;
    let operation = match chunk.status {
        ChunkStatus::Succeeded => "chunk_succeeded",
        _ => "chunk_failed",
    };
    let receipt = tokio::task::spawn_blocking(move || {
        let mut tx = store.begin_transaction(operation)?;
        tx.record_mut().put_chunk(chunk)?;
        tx.touch(chunk_id);
        tx.commit()
    })
    .await??;
    debug!(chunk_id = chunk_id.0, revision = receipt.revision, "Chunk committed");
    Ok(())
}
