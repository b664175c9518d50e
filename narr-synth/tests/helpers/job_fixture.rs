//! Job setup shared by the pipeline tests

use std::path::Path;
use std::sync::Arc;

use narr_common::config::StoreConfig;
use narr_common::model::{ChunkDescriptor, ChunkId, RemediationTrigger, StateRecord};
use narr_common::StateStore;
use narr_synth::engine::{EngineProfile, EngineRegistry, RemediationRule, RuleAction, SynthesisBackend};
use narr_synth::workflow::STATE_DIR;
use narr_synth::{JobRunner, SynthConfig};

/// Three short paragraphs used as the default document
pub const DOCUMENT: [&str; 3] = [
    "The lighthouse keeper climbed the stairs at dusk.",
    "Below him, the harbor lights flickered one by one, and the boats came home.",
    "By midnight the fog had rolled in from the sea.",
];

/// Defaults with load monitoring and transcription off and a fast lock
pub fn test_config() -> SynthConfig {
    let mut config = SynthConfig::default();
    config.pool.load_monitor = false;
    config.pool.max_workers = 4;
    config.pool.chunk_timeout_ms = 10_000;
    config.validation.tier2_enabled = false;
    config.store = StoreConfig {
        lock_timeout_ms: 5_000,
        lock_poll_ms: 5,
        ..Default::default()
    };
    config
}

/// Descriptors with ids 1..=n in text order
pub fn descriptors(texts: &[&str]) -> Vec<ChunkDescriptor> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| ChunkDescriptor {
            chunk_id: ChunkId(i as u32 + 1),
            text: text.to_string(),
            voice: None,
            engine: None,
        })
        .collect()
}

/// Engine with a `speed` parameter (default 1.0) that is raised by 0.25 when
/// output runs long
pub fn speed_profile(id: &str) -> EngineProfile {
    let mut profile = EngineProfile::new(id);
    profile.parameters.insert("speed".into(), 1.0);
    profile.remediation.push(RemediationRule {
        trigger: RemediationTrigger::DurationTooLong,
        action: RuleAction::AdjustParameter {
            name: "speed".into(),
            step: 0.25,
            min: None,
            max: Some(2.0),
        },
    });
    profile
}

/// Registry holding a single engine
pub fn single_engine(profile: EngineProfile, backend: Arc<dyn SynthesisBackend>) -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    registry.register(profile, backend);
    registry
}

/// Runner with no transcriber, no load probe, and four CPUs
pub fn open_runner(root: &Path, config: SynthConfig, registry: EngineRegistry) -> JobRunner {
    JobRunner::open(root, config, registry)
        .expect("runner opens")
        .with_transcriber(None)
        .with_load_probe(None)
        .with_cpus(4)
}

/// Current committed state, read independently of any runner
pub fn read_record(root: &Path) -> StateRecord {
    StateStore::open(root.join(STATE_DIR), StoreConfig::default())
        .expect("store opens")
        .read()
        .expect("state readable")
        .record
}
