//! One chunk through synthesis, mastering, validation, and retries

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use narr_common::model::{
    AttemptOutcome, AttemptRecord, ChunkStatus, FailureCause, RemediationAction,
    RemediationTrigger, RetryAttempt, ValidationResult,
};
use narr_common::{Chunk, ChunkId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MasteringConfig, RetryConfig};
use crate::engine::EngineRegistry;
use crate::error::{EngineFailure, SynthResult, TransientKind};
use crate::mastering::{master_buffer, MasteredBuffer};
use crate::retry::{AttemptPlan, AttemptTally, RetryDecision, RetryPlanner};
use crate::validation::ValidationPipeline;

/// Directory (under the job root) holding per-chunk artifacts
pub const AUDIO_DIR: &str = "audio";

/// Artifact path of a chunk, relative to the job root
pub fn artifact_relative_path(chunk_id: ChunkId) -> PathBuf {
    Path::new(AUDIO_DIR).join(format!("chunk-{}.wav", chunk_id.padded()))
}

/// Everything a worker needs to process chunks; shared read-only
pub struct ProcessorContext {
    pub registry: EngineRegistry,
    pub validation: ValidationPipeline,
    pub mastering: MasteringConfig,
    pub retry: RetryConfig,
    /// Job root; artifacts go under `<root>/audio`
    pub root: PathBuf,
    pub chunk_timeout: Duration,
    /// Engine for chunks without an override
    pub default_engine: String,
    /// Per-engine parameter defaults chosen by the tuner
    pub tuned: BTreeMap<String, BTreeMap<String, f64>>,
}

/// How processing of a chunk ended
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Terminal (`succeeded` or `failed`); ready to commit
    Finished(Chunk),
    /// Cancelled between attempts; nothing to commit
    Interrupted(ChunkId),
}

enum AttemptResult {
    Validated {
        mastered: MasteredBuffer,
        result: ValidationResult,
    },
    EngineFailed(EngineFailure),
}

/// Process `chunk` until it succeeds, fails terminally, or is cancelled
///
/// Cancellation is honored between attempts; the attempt in progress is
/// always finished.
pub async fn process_chunk(
    ctx: Arc<ProcessorContext>,
    mut chunk: Chunk,
    cancel: CancellationToken,
) -> SynthResult<ChunkOutcome> {
    let planner = RetryPlanner::new(&ctx.registry, &ctx.retry);
    let engine = chunk
        .engine
        .clone()
        .unwrap_or_else(|| ctx.default_engine.clone());
    let tuned = ctx.tuned.get(&engine).cloned().unwrap_or_default();

    chunk.transition_to(ChunkStatus::Synthesizing)?;
    let mut plan = match planner.initial_plan(&engine, chunk.voice.as_deref(), &tuned) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(chunk_id = chunk.chunk_id.0, engine = %engine, error = %e, "Chunk cannot start");
            chunk.final_failure = Some(FailureCause::Engine {
                message: e.to_string(),
                permanent: true,
            });
            chunk.transition_to(ChunkStatus::Failed)?;
            return Ok(ChunkOutcome::Finished(chunk));
        }
    };

    let mut tally = AttemptTally::default();
    let mut previous: Option<AttemptOutcome> = None;

    loop {
        chunk.attempt_count += 1;
        let attempt_index = chunk.attempt_count;
        tally.record(&plan.engine);
        debug!(
            chunk_id = chunk.chunk_id.0,
            attempt = attempt_index,
            engine = %plan.engine,
            voice = plan.voice.as_deref().unwrap_or("<default>"),
            "Synthesizing"
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let attempt = run_attempt(&ctx, &chunk, &plan).await?;
        let elapsed_ms = clock.elapsed().as_millis() as u64;

        let (outcome, trigger) = match attempt {
            AttemptResult::EngineFailed(failure) => {
                warn!(
                    chunk_id = chunk.chunk_id.0,
                    attempt = attempt_index,
                    engine = %plan.engine,
                    error = %failure,
                    "Engine failure"
                );
                let outcome = AttemptOutcome::EngineFailed {
                    transient: failure.is_transient(),
                    message: failure.message().to_string(),
                };
                let trigger = failure.is_transient().then_some(RemediationTrigger::EngineTransient);
                (outcome, trigger)
            }
            AttemptResult::Validated { mastered, result } => {
                chunk.transition_to(ChunkStatus::Validating)?;
                chunk.last_validation = Some(result.clone());
                if result.passed {
                    let relative = artifact_relative_path(chunk.chunk_id);
                    let absolute = ctx.root.join(&relative);
                    let audio = mastered.audio;
                    let duration = audio.duration_secs();
                    tokio::task::spawn_blocking(move || audio.write_wav_atomic(&absolute)).await??;
                    chunk.audio_path = Some(relative);
                    chunk.audio_duration_secs = Some(duration);
                }
                let trigger = result.remediation_trigger();
                (AttemptOutcome::Validated { result }, trigger)
            }
        };

        mark_improvement(&mut chunk, previous.as_ref(), &outcome);
        chunk.attempts.push(AttemptRecord {
            attempt_index,
            engine: plan.engine.clone(),
            voice: plan.voice.clone(),
            parameters: plan.parameters.clone(),
            outcome: outcome.clone(),
            started_at,
            elapsed_ms,
        });

        if let AttemptOutcome::Validated { result } = &outcome {
            if result.passed {
                chunk.final_parameters = plan.parameters.clone();
                chunk.final_engine = Some(plan.engine.clone());
                chunk.final_failure = None;
                chunk.transition_to(ChunkStatus::Succeeded)?;
                info!(
                    chunk_id = chunk.chunk_id.0,
                    attempts = chunk.attempt_count,
                    engine = %plan.engine,
                    tier = %result.tier,
                    "Chunk succeeded"
                );
                return Ok(ChunkOutcome::Finished(chunk));
            }
        }

        let decision = match trigger {
            Some(trigger) => planner.decide(&plan, trigger, &tally),
            None => RetryDecision::GiveUp {
                reason: "permanent engine failure".to_string(),
            },
        };

        match decision {
            RetryDecision::GiveUp { reason } => {
                let cause = failure_cause(&outcome);
                warn!(
                    chunk_id = chunk.chunk_id.0,
                    attempts = chunk.attempt_count,
                    cause = %cause,
                    reason = %reason,
                    "Chunk failed"
                );
                chunk.final_failure = Some(cause);
                chunk.transition_to(ChunkStatus::Failed)?;
                return Ok(ChunkOutcome::Finished(chunk));
            }
            RetryDecision::Retry { plan: next, action } => {
                if cancel.is_cancelled() {
                    info!(chunk_id = chunk.chunk_id.0, "Cancelled before retry, chunk left pending");
                    return Ok(ChunkOutcome::Interrupted(chunk.chunk_id));
                }
                // trigger is Some for every Retry decision
                let trigger = trigger.unwrap_or(RemediationTrigger::EngineTransient);
                if let RemediationAction::SwitchEngine { from, to } = &action {
                    warn!(chunk_id = chunk.chunk_id.0, from = %from, to = %to, "Switching engine");
                } else {
                    info!(
                        chunk_id = chunk.chunk_id.0,
                        attempt = attempt_index,
                        %trigger,
                        action = %action,
                        "Retrying chunk"
                    );
                }
                chunk.retry_history.push(RetryAttempt {
                    attempt_index,
                    trigger,
                    action,
                    improved: None,
                });
                chunk.transition_to(ChunkStatus::Retrying)?;
                chunk.transition_to(ChunkStatus::Synthesizing)?;
                plan = next;
                previous = Some(outcome);
            }
        }
    }
}

/// Synthesize under the chunk timeout, then master and validate
async fn run_attempt(
    ctx: &Arc<ProcessorContext>,
    chunk: &Chunk,
    plan: &AttemptPlan,
) -> SynthResult<AttemptResult> {
    let adapter = ctx.registry.get(&plan.engine)?;
    let text = chunk.text.clone();
    let voice = plan.voice.clone();
    let parameters = plan.parameters.clone();
    let mut synthesis =
        tokio::task::spawn_blocking(move || adapter.synthesize(&text, voice.as_deref(), &parameters));

    let joined = match tokio::time::timeout(ctx.chunk_timeout, &mut synthesis).await {
        Ok(joined) => joined,
        Err(_) => {
            // The worker slot stays taken until the abandoned call returns,
            // so a retry never runs alongside it.
            warn!(
                chunk_id = chunk.chunk_id.0,
                engine = %plan.engine,
                timeout_ms = ctx.chunk_timeout.as_millis() as u64,
                "Synthesis timed out, waiting for the engine call to return"
            );
            if let Err(e) = synthesis.await {
                debug!(chunk_id = chunk.chunk_id.0, error = %e, "Abandoned engine call panicked");
            }
            return Ok(AttemptResult::EngineFailed(EngineFailure::transient(
                TransientKind::Timeout,
                format!("no audio after {:?}", ctx.chunk_timeout),
            )));
        }
    };
    let raw = match joined {
        Ok(Ok(audio)) => audio,
        Ok(Err(failure)) => return Ok(AttemptResult::EngineFailed(failure)),
        Err(e) => {
            return Ok(AttemptResult::EngineFailed(EngineFailure::transient(
                TransientKind::Unavailable,
                format!("engine {} crashed: {}", plan.engine, panic_message(e)),
            )))
        }
    };

    let ctx = Arc::clone(ctx);
    let chunk_id = chunk.chunk_id;
    let text = chunk.text.clone();
    let expected = chunk.expected_duration_secs;
    let (mastered, result) = tokio::task::spawn_blocking(move || {
        let mastered = master_buffer(&raw, &ctx.mastering);
        let result = ctx.validation.validate(chunk_id, &text, expected, &mastered.audio);
        (mastered, result)
    })
    .await?;

    debug!(
        chunk_id = chunk_id.0,
        input_lufs = mastered.input_lufs,
        gain_db = mastered.applied_gain_db,
        limiter_db = mastered.limiter.max_reduction_db,
        gated_windows = mastered.gated_windows,
        passed = result.passed,
        "Mastered and validated"
    );
    Ok(AttemptResult::Validated { mastered, result })
}

fn panic_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

/// Fill in `improved` on the remediation that led to `current`
fn mark_improvement(chunk: &mut Chunk, previous: Option<&AttemptOutcome>, current: &AttemptOutcome) {
    let Some(last) = chunk.retry_history.last_mut() else {
        return;
    };
    if last.improved.is_some() {
        return;
    }
    let Some(previous) = previous else {
        return;
    };
    let improved = match (previous, current) {
        (_, AttemptOutcome::EngineFailed { .. }) => false,
        (AttemptOutcome::EngineFailed { .. }, AttemptOutcome::Validated { .. }) => true,
        (AttemptOutcome::Validated { result: before }, AttemptOutcome::Validated { result: after }) => {
            before.improved_by(after)
        }
    };
    last.improved = Some(improved);
}

fn failure_cause(outcome: &AttemptOutcome) -> FailureCause {
    match outcome {
        AttemptOutcome::Validated { result } => match result.reason {
            Some(reason) => FailureCause::Validation { reason },
            None => FailureCause::Engine {
                message: "validation failed without a reason".to_string(),
                permanent: false,
            },
        },
        AttemptOutcome::EngineFailed { transient, message } => FailureCause::Engine {
            message: message.clone(),
            permanent: !transient,
        },
    }
}
