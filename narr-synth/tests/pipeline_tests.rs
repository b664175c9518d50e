//! End-to-end job tests with scripted engines
//!
//! Covers:
//! - Remediation by parameter adjustment
//! - Manifest independence from completion order
//! - Zero-energy output never succeeding
//! - Attempt caps, persistence of failures across runs, explicit reset
//! - Recovery of chunks stranded in flight
//! - Cancellation between attempts
//! - Engine fallback, timeouts, permanent failures
//! - Transcript tier with an injected transcriber
//! - Autonomous tuning after enough clean runs

mod helpers;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::*;
use narr_common::config::StoreConfig;
use narr_common::model::{
    AttemptOutcome, ChunkId, ChunkStatus, FailureCause, FailureReason, RemediationAction,
    ValidationTier,
};
use narr_common::StateStore;
use narr_synth::engine::{EngineProfile, EngineRegistry};
use narr_synth::workflow::{artifact_relative_path, STATE_DIR};
use narr_synth::{AudioBuffer, EngineFailure, TransientKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Engine that runs long on the "harbor" paragraph until `speed` is raised
fn slow_harbor_engine() -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(|call, _| {
        let stretch = if call.text.contains("harbor") && call.param("speed") < 1.2 {
            2.0
        } else {
            1.0
        };
        Ok(narration_for(&call.text, stretch))
    }))
}

// ============================================================================
// Remediation
// ============================================================================

/// **Given:** three chunks; the engine output for chunk 2 runs twice as long
/// as expected until `speed` is raised
/// **When:** the job runs
/// **Then:** chunk 2 succeeds on its second attempt after one adjustment;
/// the others succeed first time and the manifest is complete
#[tokio::test]
async fn test_duration_failure_is_remediated_by_parameter_adjustment() {
    let dir = TempDir::new().unwrap();
    let engine = slow_harbor_engine();
    let runner = open_runner(
        dir.path(),
        test_config(),
        single_engine(speed_profile("kokoro"), engine.clone()),
    );
    let init = runner.initialize_job(&descriptors(&DOCUMENT)).unwrap();
    assert!(init.created);
    assert_eq!(init.inserted, 3);

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.succeeded, 3);
    assert_eq!(outcome.run.failed, 0);
    assert_eq!(outcome.run.total_attempts, 4);
    assert!(outcome.manifest.is_complete());

    let record = read_record(dir.path());
    let harbor = record.chunk(ChunkId(2)).unwrap();
    assert_eq!(harbor.status, ChunkStatus::Succeeded);
    assert_eq!(harbor.attempt_count, 2);
    assert_eq!(harbor.retry_history.len(), 1);
    assert_eq!(
        harbor.retry_history[0].action,
        RemediationAction::AdjustParameter {
            name: "speed".into(),
            from: 1.0,
            to: 1.25
        }
    );
    assert_eq!(harbor.retry_history[0].improved, Some(true));
    assert_eq!(harbor.final_parameters.get("speed"), Some(&1.25));
    match &harbor.attempts[0].outcome {
        AttemptOutcome::Validated { result } => {
            assert_eq!(result.reason, Some(FailureReason::DurationMismatch));
            assert!(result.evidence.duration_ratio.unwrap() > 1.7);
        }
        other => panic!("unexpected first outcome: {:?}", other),
    }

    for id in [1, 3] {
        assert_eq!(record.chunk(ChunkId(id)).unwrap().attempt_count, 1);
    }
    assert_eq!(engine.calls_containing("harbor"), 2);
    let artifact = AudioBuffer::read_wav_file(&dir.path().join(artifact_relative_path(ChunkId(2))))
        .unwrap();
    assert!((artifact.duration_secs() - harbor.audio_duration_secs.unwrap()).abs() < 1e-3);
}

// ============================================================================
// Ordering
// ============================================================================

async fn run_with_jitter(seed: u64) -> Vec<(ChunkId, String, f64, f64)> {
    let dir = TempDir::new().unwrap();
    let rng = Mutex::new(StdRng::seed_from_u64(seed));
    let engine = Arc::new(ScriptedEngine::new(move |call, _| {
        let delay = rng.lock().unwrap().gen_range(0..40);
        std::thread::sleep(Duration::from_millis(delay));
        Ok(narration_for(&call.text, 1.0))
    }));
    let texts: Vec<String> = (1..=8)
        .map(|i| format!("Chapter {} opens on a quiet street, and nobody is awake.", i))
        .collect();
    let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
    let runner = open_runner(
        dir.path(),
        test_config(),
        single_engine(EngineProfile::new("kokoro"), engine),
    );
    runner.initialize_job(&descriptors(&texts)).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.run.succeeded, 8);

    outcome
        .manifest
        .entries
        .iter()
        .map(|e| {
            (
                e.chunk_id,
                e.audio_path.display().to_string(),
                e.duration_secs,
                e.start_secs,
            )
        })
        .collect()
}

/// **Given:** the same document processed twice by four workers with
/// different random engine delays
/// **When:** both runs complete
/// **Then:** the manifests list identical entries in chunk order
#[tokio::test]
async fn test_manifest_is_independent_of_completion_order() {
    let first = run_with_jitter(1).await;
    let second = run_with_jitter(99).await;

    assert_eq!(first, second);
    let ids: Vec<u32> = first.iter().map(|(id, ..)| id.0).collect();
    assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    for pair in first.windows(2) {
        let (_, _, duration, start) = &pair[0];
        assert!((start + duration - pair[1].3).abs() < 1e-9);
    }
}

// ============================================================================
// Failure, caps, reset
// ============================================================================

/// **Given:** an engine that returns pure silence for chunk 2 until fixed
/// **When:** the job runs, runs again, then chunk 2 is reset and run once more
/// **Then:** chunk 2 fails as too quiet after the per-engine cap, is left
/// alone by the second run, and succeeds only after the explicit reset
#[tokio::test]
async fn test_silent_output_fails_and_stays_failed_until_reset() {
    let dir = TempDir::new().unwrap();
    let fixed = Arc::new(AtomicBool::new(false));
    let engine = {
        let fixed = Arc::clone(&fixed);
        Arc::new(ScriptedEngine::new(move |call, _| {
            if call.text.contains("harbor") && !fixed.load(Ordering::SeqCst) {
                Ok(AudioBuffer::silence(expected_secs(&call.text), TEST_SAMPLE_RATE))
            } else {
                Ok(narration_for(&call.text, 1.0))
            }
        }))
    };
    let runner = open_runner(
        dir.path(),
        test_config(),
        single_engine(EngineProfile::new("kokoro"), engine.clone()),
    );
    runner.initialize_job(&descriptors(&DOCUMENT)).unwrap();

    // First run: cap of 3 attempts on the only engine
    let first = runner.run(CancellationToken::new()).await.unwrap();
    assert_eq!(first.run.succeeded, 2);
    assert_eq!(first.run.failed, 1);
    assert_eq!(first.manifest.failed, vec![ChunkId(2)]);
    assert!(!first.manifest.is_complete());

    let record = read_record(dir.path());
    let harbor = record.chunk(ChunkId(2)).unwrap();
    assert_eq!(harbor.status, ChunkStatus::Failed);
    assert_eq!(harbor.attempt_count, 3);
    assert!(harbor.audio_path.is_none());
    assert_eq!(
        harbor.final_failure,
        Some(FailureCause::Validation {
            reason: FailureReason::TooQuiet
        })
    );
    assert!(harbor
        .retry_history
        .iter()
        .all(|r| r.action == RemediationAction::RetryUnchanged));

    // Second run: failed chunks are terminal
    let second = runner.run(CancellationToken::new()).await.unwrap();
    assert_eq!(second.run.chunks_processed, 0);
    assert_eq!(engine.calls_containing("harbor"), 3);

    // Explicit reset, with the engine fixed
    fixed.store(true, Ordering::SeqCst);
    runner.reset_chunks(&[ChunkId(2)]).unwrap();
    let third = runner.run(CancellationToken::new()).await.unwrap();
    assert_eq!(third.run.succeeded, 1);
    assert!(third.manifest.is_complete());

    let record = read_record(dir.path());
    let harbor = record.chunk(ChunkId(2)).unwrap();
    assert_eq!(harbor.status, ChunkStatus::Succeeded);
    assert_eq!(harbor.reset_count, 1);
    assert_eq!(harbor.attempt_count, 1);
    assert_eq!(harbor.attempts.len(), 4);
    assert_eq!(record.metadata.runs.len(), 3);

    let summary = runner.summary().unwrap();
    assert_eq!(summary.succeeded, 3);
    assert!(summary.failed_chunks.is_empty());
}

/// **Given:** an engine whose output never fits, and a hard cap of 2 attempts
/// **When:** the job runs
/// **Then:** the chunk fails after exactly 2 attempts with the last reason
#[tokio::test]
async fn test_total_attempt_cap_is_honoured() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|call, _| Ok(narration_for(&call.text, 3.0))));
    let mut config = test_config();
    config.retry.max_total_attempts = 2;
    let runner = open_runner(
        dir.path(),
        config,
        single_engine(speed_profile("kokoro"), engine.clone()),
    );
    runner.initialize_job(&descriptors(&DOCUMENT[..1])).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.failed, 1);
    let chunk = read_record(dir.path()).chunk(ChunkId(1)).cloned().unwrap();
    assert_eq!(chunk.attempt_count, 2);
    assert_eq!(engine.calls().len(), 2);
    assert_eq!(
        chunk.final_failure,
        Some(FailureCause::Validation {
            reason: FailureReason::DurationMismatch
        })
    );
}

// ============================================================================
// Recovery and cancellation
// ============================================================================

/// **Given:** persisted state with chunk 1 left in `synthesizing` (a crash)
/// **When:** the job runs again
/// **Then:** chunk 1 is returned to pending first and then processed
#[tokio::test]
async fn test_chunk_stranded_in_flight_is_recovered() {
    let dir = TempDir::new().unwrap();
    let runner = open_runner(
        dir.path(),
        test_config(),
        single_engine(EngineProfile::new("kokoro"), Arc::new(ScriptedEngine::clean())),
    );
    runner.initialize_job(&descriptors(&DOCUMENT)).unwrap();
    {
        let store =
            StateStore::open(dir.path().join(STATE_DIR), StoreConfig::default()).unwrap();
        let mut tx = store.begin_transaction("simulate_crash").unwrap();
        tx.record_mut().chunk_mut(ChunkId(1)).unwrap().status = ChunkStatus::Synthesizing;
        tx.touch(ChunkId(1));
        tx.commit().unwrap();
    }

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.recovered, vec![ChunkId(1)]);
    assert_eq!(outcome.run.succeeded, 3);
    let audit = runner.store().audit_entries().unwrap();
    assert!(audit.iter().any(|e| e.operation == "recover_in_flight"));
}

/// **Given:** one worker, and chunk 1's first attempt fails transiently
/// while the run is cancelled
/// **When:** the run ends and a second run starts
/// **Then:** nothing else starts, chunk 1 stays pending with no committed
/// attempts, and the second run completes the job
#[tokio::test]
async fn test_cancellation_leaves_chunks_pending_and_resumable() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let engine = {
        let cancel = cancel.clone();
        Arc::new(ScriptedEngine::new(move |call, earlier| {
            if call.text.contains("lighthouse") && earlier == 0 {
                cancel.cancel();
                return Err(EngineFailure::transient(
                    TransientKind::ResourceExhausted,
                    "device busy",
                ));
            }
            Ok(narration_for(&call.text, 1.0))
        }))
    };
    let mut config = test_config();
    config.pool.max_workers = 1;
    let runner = open_runner(
        dir.path(),
        config,
        single_engine(EngineProfile::new("kokoro"), engine.clone()),
    );
    runner.initialize_job(&descriptors(&DOCUMENT)).unwrap();

    let interrupted = runner.run(cancel).await.unwrap();

    assert!(interrupted.run.cancelled);
    assert_eq!(interrupted.report.interrupted, vec![ChunkId(1)]);
    assert_eq!(interrupted.run.chunks_processed, 0);
    assert_eq!(engine.calls().len(), 1);
    let record = read_record(dir.path());
    assert!(record.chunks.values().all(|c| c.status == ChunkStatus::Pending));
    assert_eq!(record.chunk(ChunkId(1)).unwrap().attempt_count, 0);

    let resumed = runner.run(CancellationToken::new()).await.unwrap();

    assert!(!resumed.run.cancelled);
    assert_eq!(resumed.run.succeeded, 3);
    assert_eq!(engine.calls_containing("lighthouse"), 2);
}

// ============================================================================
// Engine failures
// ============================================================================

/// **Given:** a primary engine that is always unavailable, with a fallback
/// **When:** the job runs
/// **Then:** after 3 transient failures the chunk switches engines and
/// succeeds on the fallback
#[tokio::test]
async fn test_exhausted_engine_falls_back() {
    let dir = TempDir::new().unwrap();
    let broken = Arc::new(ScriptedEngine::new(|_, _| {
        Err(EngineFailure::transient(TransientKind::Unavailable, "process crashed"))
    }));
    let mut primary = EngineProfile::new("alpha");
    primary.fallback = Some("beta".into());
    let mut registry = EngineRegistry::new();
    registry.register(primary, broken.clone());
    registry.register(EngineProfile::new("beta"), Arc::new(ScriptedEngine::clean()));
    let runner = open_runner(dir.path(), test_config(), registry);
    runner.initialize_job(&descriptors(&DOCUMENT[..1])).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.succeeded, 1);
    let chunk = read_record(dir.path()).chunk(ChunkId(1)).cloned().unwrap();
    assert_eq!(chunk.attempt_count, 4);
    assert_eq!(chunk.final_engine.as_deref(), Some("beta"));
    assert_eq!(broken.calls().len(), 3);
    assert_eq!(
        chunk.retry_history.last().map(|r| &r.action),
        Some(&RemediationAction::SwitchEngine {
            from: "alpha".into(),
            to: "beta".into()
        })
    );
}

/// **Given:** an engine whose first call outlasts the chunk timeout
/// **When:** the job runs
/// **Then:** the first attempt is recorded as a transient timeout and the
/// retry succeeds
#[tokio::test]
async fn test_timeout_is_a_transient_failure() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|call, earlier| {
        if earlier == 0 {
            std::thread::sleep(Duration::from_millis(800));
        }
        Ok(narration_for(&call.text, 1.0))
    }));
    let mut config = test_config();
    config.pool.chunk_timeout_ms = 150;
    let runner = open_runner(
        dir.path(),
        config,
        single_engine(EngineProfile::new("kokoro"), engine),
    );
    runner.initialize_job(&descriptors(&DOCUMENT[..1])).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.succeeded, 1);
    let chunk = read_record(dir.path()).chunk(ChunkId(1)).cloned().unwrap();
    assert_eq!(chunk.attempt_count, 2);
    match &chunk.attempts[0].outcome {
        AttemptOutcome::EngineFailed { transient, message } => {
            assert!(transient);
            assert!(message.contains("no audio after"), "{}", message);
        }
        other => panic!("expected an engine failure, got {:?}", other),
    }
}

/// Engine that sleeps `delay_ms(earlier)` per call and records the peak
/// number of calls running at once
fn overlap_tracking_engine(
    delay_ms: impl Fn(usize) -> u64 + Send + Sync + 'static,
) -> (Arc<ScriptedEngine>, Arc<AtomicUsize>) {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let engine = {
        let peak = Arc::clone(&peak);
        Arc::new(ScriptedEngine::new(move |call, earlier| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(delay_ms(earlier)));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(narration_for(&call.text, 1.0))
        }))
    };
    (engine, peak)
}

/// **Given:** a single chunk whose first engine call runs well past the
/// chunk timeout
/// **When:** the job runs
/// **Then:** the retry starts only after the abandoned call has returned
#[tokio::test]
async fn test_timed_out_call_never_overlaps_its_retry() {
    let dir = TempDir::new().unwrap();
    let (engine, peak) = overlap_tracking_engine(|earlier| if earlier == 0 { 500 } else { 0 });
    let mut config = test_config();
    config.pool.chunk_timeout_ms = 100;
    let runner = open_runner(
        dir.path(),
        config,
        single_engine(EngineProfile::new("kokoro"), engine.clone()),
    );
    runner.initialize_job(&descriptors(&DOCUMENT[..1])).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.succeeded, 1);
    assert_eq!(engine.calls().len(), 2);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

/// **Given:** an engine that panics on chunk 2
/// **When:** the job runs twice
/// **Then:** each panic is recorded as a transient engine failure, chunk 2
/// fails at the per-engine cap and stays failed on the next run
#[tokio::test]
async fn test_engine_panic_is_a_recorded_failure() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|call, _| {
        if call.text.contains("harbor") {
            panic!("synthesizer lost its model");
        }
        Ok(narration_for(&call.text, 1.0))
    }));
    let runner = open_runner(
        dir.path(),
        test_config(),
        single_engine(EngineProfile::new("kokoro"), engine.clone()),
    );
    runner.initialize_job(&descriptors(&DOCUMENT)).unwrap();

    let first = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(first.run.succeeded, 2);
    assert_eq!(first.run.failed, 1);
    assert!(first.report.errors.is_empty());
    let record = read_record(dir.path());
    let harbor = record.chunk(ChunkId(2)).unwrap();
    assert_eq!(harbor.status, ChunkStatus::Failed);
    assert_eq!(harbor.attempt_count, 3);
    match &harbor.final_failure {
        Some(FailureCause::Engine { message, permanent }) => {
            assert!(!permanent);
            assert!(message.contains("lost its model"), "{}", message);
        }
        other => panic!("expected an engine failure, got {:?}", other),
    }

    let second = runner.run(CancellationToken::new()).await.unwrap();
    assert_eq!(second.run.chunks_processed, 0);
    assert_eq!(engine.calls_containing("harbor"), 3);
}

/// **Given:** four CPUs, a cost-1 engine and a registered but unused cost-4
/// fallback
/// **When:** four chunks run on the cost-1 engine
/// **Then:** more than one of them synthesizes at a time
#[tokio::test]
async fn test_unused_heavy_engine_does_not_shrink_pool() {
    let dir = TempDir::new().unwrap();
    let (engine, peak) = overlap_tracking_engine(|_| 200);
    let mut light = EngineProfile::new("kokoro");
    light.fallback = Some("zonos".into());
    let mut heavy = EngineProfile::new("zonos");
    heavy.concurrency_cost = 4.0;
    let mut registry = EngineRegistry::new();
    registry.register(light, engine);
    registry.register(heavy, Arc::new(ScriptedEngine::clean()));
    let runner = open_runner(dir.path(), test_config(), registry);
    let texts: Vec<String> = (1..=4)
        .map(|i| format!("Letter {} arrived before the storm broke over the hills.", i))
        .collect();
    let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
    runner.initialize_job(&descriptors(&texts)).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.succeeded, 4);
    assert!(peak.load(Ordering::SeqCst) > 1, "peak {}", peak.load(Ordering::SeqCst));
}

/// **Given:** a chunk requesting a voice the engine does not offer
/// **When:** the job runs
/// **Then:** the chunk fails after one attempt with a permanent engine failure
#[tokio::test]
async fn test_unknown_voice_is_a_permanent_failure() {
    let dir = TempDir::new().unwrap();
    let mut profile = EngineProfile::new("kokoro");
    profile.voices = vec!["af_heart".into()];
    let engine = Arc::new(ScriptedEngine::clean());
    let runner = open_runner(dir.path(), test_config(), single_engine(profile, engine.clone()));
    let mut chunks = descriptors(&DOCUMENT[..1]);
    chunks[0].voice = Some("nobody".into());
    runner.initialize_job(&chunks).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.failed, 1);
    let chunk = read_record(dir.path()).chunk(ChunkId(1)).cloned().unwrap();
    assert_eq!(chunk.attempt_count, 1);
    assert!(chunk.retry_history.is_empty());
    assert!(matches!(
        chunk.final_failure,
        Some(FailureCause::Engine { permanent: true, .. })
    ));
    assert!(engine.calls().is_empty());
}

// ============================================================================
// Transcript tier
// ============================================================================

/// **Given:** Tier 3 enabled and a transcriber whose first transcript is cut
/// short
/// **When:** the job runs
/// **Then:** the first attempt fails as truncation at Tier 3 and the retry
/// passes at Tier 3
#[tokio::test]
async fn test_truncated_transcript_triggers_retry() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.validation.tier3_enabled = true;
    let runner = open_runner(
        dir.path(),
        config,
        single_engine(EngineProfile::new("kokoro"), Arc::new(ScriptedEngine::clean())),
    )
    .with_transcriber(Some(Arc::new(QueuedTranscriber::new(&[
        "by midnight the",
        "By midnight the fog had rolled in from the sea.",
    ]))));
    runner.initialize_job(&descriptors(&DOCUMENT[2..])).unwrap();

    let outcome = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.run.succeeded, 1);
    let chunk = read_record(dir.path()).chunk(ChunkId(1)).cloned().unwrap();
    assert_eq!(chunk.attempt_count, 2);
    match &chunk.attempts[0].outcome {
        AttemptOutcome::Validated { result } => {
            assert_eq!(result.tier, ValidationTier::Tier3);
            assert_eq!(result.reason, Some(FailureReason::Truncation));
        }
        other => panic!("unexpected first outcome: {:?}", other),
    }
    let last = chunk.last_validation.unwrap();
    assert!(last.passed);
    assert_eq!(last.tier, ValidationTier::Tier3);
    assert_eq!(last.evidence.word_error_rate, Some(0.0));
}

// ============================================================================
// Run history and tuning
// ============================================================================

/// **Given:** three clean runs in which every chunk needed `speed` raised
/// to 1.25
/// **When:** a fourth run processes new chunks
/// **Then:** the run is autonomous and the new chunks start at the learned
/// speed, succeeding on their first attempt
#[tokio::test]
async fn test_clean_history_enables_learned_parameters() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|call, _| {
        let stretch = if call.param("speed") < 1.2 { 2.0 } else { 1.0 };
        Ok(narration_for(&call.text, stretch))
    }));
    let runner = open_runner(
        dir.path(),
        test_config(),
        single_engine(speed_profile("kokoro"), engine),
    );
    let texts: Vec<String> = (1..=16)
        .map(|i| format!("Entry {} of the ship's log records calm water and a steady wind.", i))
        .collect();
    let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
    let all = descriptors(&texts);

    for batch in 0..3 {
        runner.initialize_job(&all[..(batch + 1) * 4]).unwrap();
        let outcome = runner.run(CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.run.tuning_mode, "supervised");
        assert_eq!(outcome.run.succeeded, 4);
        assert_eq!(outcome.run.total_attempts, 8);
    }

    runner.initialize_job(&all).unwrap();
    let tuned = runner.run(CancellationToken::new()).await.unwrap();

    assert_eq!(tuned.run.tuning_mode, "autonomous");
    assert_eq!(tuned.run.succeeded, 4);
    assert_eq!(tuned.run.total_attempts, 4);
    let record = read_record(dir.path());
    for id in 13..=16 {
        let chunk = record.chunk(ChunkId(id)).unwrap();
        assert_eq!(chunk.attempt_count, 1);
        assert_eq!(chunk.final_parameters.get("speed"), Some(&1.25));
    }
    assert_eq!(record.metadata.runs.len(), 4);
}

/// **Given:** an existing job
/// **When:** the same descriptors are submitted again
/// **Then:** nothing is inserted and the revision does not move
#[tokio::test]
async fn test_resubmitting_descriptors_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let runner = open_runner(
        dir.path(),
        test_config(),
        single_engine(EngineProfile::new("kokoro"), Arc::new(ScriptedEngine::clean())),
    );
    let first = runner.initialize_job(&descriptors(&DOCUMENT)).unwrap();

    let again = runner.initialize_job(&descriptors(&DOCUMENT)).unwrap();

    assert!(!again.created);
    assert_eq!(again.inserted, 0);
    assert_eq!(again.revision, first.revision);

    let mut changed = descriptors(&DOCUMENT);
    changed[0].text = "A different first paragraph.".into();
    assert!(runner.initialize_job(&changed).is_err());
}
