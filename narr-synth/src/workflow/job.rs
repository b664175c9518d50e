//! Job lifecycle: initialize, recover, run, reset, summarize
//!
//! A job lives in a root folder:
//! - `state/`: the transactional state store
//! - `audio/`: mastered per-chunk artifacts
//! - `manifest.json`: assembly manifest, rewritten after every run

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use narr_common::model::{ChunkDescriptor, ChunkId, RunSummary, StateRecord};
use narr_common::{CommitReceipt, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::chunk_processor::ProcessorContext;
use super::worker_pool::{LoadProbe, PoolBudget, PoolReport, ProcLoadAvg, WorkerPool};
use crate::assembly::{build_manifest, write_manifest, AssemblyManifest};
use crate::config::SynthConfig;
use crate::engine::EngineRegistry;
use crate::error::{SynthError, SynthResult};
use crate::summary::JobSummary;
use crate::tuner::plan_run;
use crate::validation::{estimate_duration_secs, CommandTranscriber, Sampler, Transcriber, ValidationPipeline};

/// State store directory under the job root
pub const STATE_DIR: &str = "state";

/// Result of [`JobRunner::initialize_job`]
#[derive(Debug, Clone, PartialEq)]
pub struct JobInit {
    /// A new record was created (first run)
    pub created: bool,
    /// Chunks added by this call
    pub inserted: usize,
    pub revision: u64,
}

/// What one call to [`JobRunner::run`] did
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: RunSummary,
    pub report: PoolReport,
    /// Chunks returned to pending from a crashed run
    pub recovered: Vec<ChunkId>,
    pub manifest: AssemblyManifest,
    pub manifest_path: PathBuf,
}

pub struct JobRunner {
    config: SynthConfig,
    root: PathBuf,
    store: Arc<StateStore>,
    registry: EngineRegistry,
    transcriber: Option<Arc<dyn Transcriber>>,
    load_probe: Option<Arc<dyn LoadProbe>>,
    cpus: usize,
}

impl JobRunner {
    /// Open the job rooted at `root`
    ///
    /// The transcriber and load probe default to what the configuration
    /// describes; tests replace them with the `with_*` methods.
    pub fn open(root: &Path, config: SynthConfig, registry: EngineRegistry) -> SynthResult<Self> {
        config.validate()?;
        let store = StateStore::open(root.join(STATE_DIR), config.store.clone())?;
        let transcriber = config
            .transcriber
            .clone()
            .map(|t| Arc::new(CommandTranscriber::new(t)) as Arc<dyn Transcriber>);
        let load_probe = config
            .pool
            .load_monitor
            .then(|| Arc::new(ProcLoadAvg::new()) as Arc<dyn LoadProbe>);
        Ok(Self {
            config,
            root: root.to_path_buf(),
            store: Arc::new(store),
            registry,
            transcriber,
            load_probe,
            cpus: num_cpus::get(),
        })
    }

    pub fn with_transcriber(mut self, transcriber: Option<Arc<dyn Transcriber>>) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn with_load_probe(mut self, probe: Option<Arc<dyn LoadProbe>>) -> Self {
        self.load_probe = probe;
        self
    }

    /// Override the detected CPU count used for pool sizing
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    fn default_engine(&self) -> SynthResult<String> {
        self.config
            .default_engine_id()
            .map(str::to_string)
            .or_else(|| self.registry.ids().next().map(str::to_string))
            .ok_or_else(|| SynthError::Config("no engine configured".to_string()))
    }

    /// Create the job record, or merge new descriptors into an existing one
    ///
    /// Existing ids must carry the same text; otherwise the job belongs to a
    /// different document and nothing is written.
    pub fn initialize_job(&self, descriptors: &[ChunkDescriptor]) -> SynthResult<JobInit> {
        let validation = &self.config.validation;
        let estimate = |text: &str| estimate_duration_secs(text, validation);

        if !self.store.exists() {
            let mut record = StateRecord::new(self.default_engine()?);
            let inserted = record.merge_descriptors(descriptors, estimate)?;
            let receipt = self.store.initialize(record)?;
            info!(chunks = inserted, revision = receipt.revision, "Job created");
            return Ok(JobInit {
                created: true,
                inserted,
                revision: receipt.revision,
            });
        }

        let mut tx = self.store.begin_transaction("initialize_job")?;
        let before: Vec<ChunkId> = tx.record().chunks.keys().copied().collect();
        let inserted = tx.record_mut().merge_descriptors(descriptors, estimate)?;
        if inserted == 0 {
            let revision = tx.record().metadata.revision;
            tx.rollback();
            info!(revision, "Job resumed, no new chunks");
            return Ok(JobInit {
                created: false,
                inserted: 0,
                revision,
            });
        }
        let added: Vec<ChunkId> = tx
            .record()
            .chunks
            .keys()
            .filter(|id| !before.contains(id))
            .copied()
            .collect();
        for id in added {
            tx.touch(id);
        }
        let receipt = tx.commit()?;
        info!(chunks = inserted, revision = receipt.revision, "Job resumed with new chunks");
        Ok(JobInit {
            created: false,
            inserted,
            revision: receipt.revision,
        })
    }

    /// Return chunks stranded in an in-flight status to pending
    pub fn recover_in_flight(&self) -> SynthResult<Vec<ChunkId>> {
        recover(&self.store)
    }

    /// Explicit operator reset of failed chunks
    pub fn reset_chunks(&self, ids: &[ChunkId]) -> SynthResult<CommitReceipt> {
        Ok(self.store.reset_chunks(ids)?)
    }

    pub fn summary(&self) -> SynthResult<JobSummary> {
        let loaded = self.store.read()?;
        if let Some(backup) = &loaded.restored_from {
            warn!(backup = %backup.display(), "State restored from backup");
        }
        Ok(JobSummary::from_record(&loaded.record))
    }

    /// Process every pending chunk
    ///
    /// Terminal chunks are skipped, so calling this again after a crash or
    /// cancellation resumes the job. Appends a run summary and rewrites the
    /// manifest when done.
    pub async fn run(&self, cancel: CancellationToken) -> SynthResult<RunOutcome> {
        let started_at = Utc::now();
        let store = Arc::clone(&self.store);
        let recovered = tokio::task::spawn_blocking(move || recover(&store)).await??;

        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || store.read()).await??;
        if let Some(backup) = &loaded.restored_from {
            warn!(backup = %backup.display(), "State restored from backup");
        }
        let record = loaded.record;

        let default_engine = record.metadata.engine.clone();
        if !self.registry.contains(&default_engine) {
            return Err(SynthError::UnknownEngine(default_engine));
        }

        let tuning = plan_run(&record, &self.config.tuner, &self.config.gate);

        let chunk_ids: Vec<ChunkId> = record.chunks.keys().copied().collect();
        let seed = self
            .config
            .validation
            .seed
            .unwrap_or_else(|| Sampler::seed_from_job(&record.metadata.job_id));
        let sampler = Sampler::new(
            seed,
            self.config.validation.sample_fraction,
            self.config.validation.sample_edge_count,
            &chunk_ids,
        );
        let validation =
            ValidationPipeline::new(self.config.validation.clone(), self.transcriber.clone(), sampler);

        let pending: Vec<_> = record
            .pending_ids()
            .into_iter()
            .filter_map(|id| record.chunk(id).cloned())
            .collect();
        let budget = PoolBudget::new(self.cpus, &self.config.pool);
        let workers = budget.workers_for(self.registry.concurrency_cost(&default_engine));
        info!(
            job_id = %record.metadata.job_id,
            pending = pending.len(),
            total = chunk_ids.len(),
            workers,
            tuning = %tuning.mode,
            "Starting job run"
        );

        let ctx = Arc::new(ProcessorContext {
            registry: self.registry.clone(),
            validation,
            mastering: self.config.mastering.clone(),
            retry: self.config.retry.clone(),
            root: self.root.clone(),
            chunk_timeout: self.config.pool.chunk_timeout(),
            default_engine,
            tuned: tuning.parameters,
        });
        let mut pool = WorkerPool::new(ctx, Arc::clone(&self.store), self.config.pool.clone(), budget);
        if let Some(probe) = &self.load_probe {
            pool = pool.with_load_probe(Arc::clone(probe));
        }
        let report = pool.run(pending, cancel).await?;

        let run = RunSummary {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            chunks_processed: report.completed.len(),
            succeeded: report.succeeded,
            failed: report.failed,
            total_attempts: report.attempts,
            cancelled: report.cancelled,
            tuning_mode: tuning.mode.to_string(),
        };

        let store = Arc::clone(&self.store);
        let root = self.root.clone();
        let to_record = run.clone();
        let (manifest, manifest_path) = tokio::task::spawn_blocking(move || -> SynthResult<_> {
            let mut tx = store.begin_transaction("record_run")?;
            tx.record_mut().metadata.runs.push(to_record);
            tx.commit()?;
            let manifest = build_manifest(&store.read()?.record);
            let path = write_manifest(&root, &manifest)?;
            Ok((manifest, path))
        })
        .await??;

        info!(
            succeeded = run.succeeded,
            failed = run.failed,
            cancelled = run.cancelled,
            complete = manifest.is_complete(),
            "Job run finished"
        );
        Ok(RunOutcome {
            run,
            report,
            recovered,
            manifest,
            manifest_path,
        })
    }
}

fn recover(store: &StateStore) -> SynthResult<Vec<ChunkId>> {
    let stranded = store
        .read()?
        .record
        .chunks
        .values()
        .any(|c| c.status.is_in_flight());
    if !stranded {
        return Ok(Vec::new());
    }
    let mut tx = store.begin_transaction("recover_in_flight")?;
    let recovered = tx.record_mut().recover_in_flight();
    for &id in &recovered {
        warn!(chunk_id = id.0, "Chunk left in flight by an earlier run, returned to pending");
        tx.touch(id);
    }
    tx.commit()?;
    Ok(recovered)
}
