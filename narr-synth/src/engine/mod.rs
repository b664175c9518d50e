//! Engine adapters
//!
//! A [`SynthesisBackend`] is the engine-specific part: it receives text that
//! already fits the engine's input limit, a resolved voice, and native
//! parameter names. [`EngineAdapter`] puts the uniform contract in front of
//! it, and [`EngineRegistry`] maps engine ids to adapters.

mod adapter;
mod command;
mod profile;
mod registry;
mod split;

pub use adapter::EngineAdapter;
pub use command::CommandBackend;
pub use profile::{CommandSpec, EngineProfile, OversizePolicy, RemediationRule, RuleAction};
pub use registry::EngineRegistry;
pub use split::split_text;

use std::collections::BTreeMap;

use crate::audio::AudioBuffer;
use crate::error::EngineFailure;

/// Engine-specific synthesis
///
/// Calls are blocking; the worker pool runs them on the blocking thread pool
/// under a timeout.
pub trait SynthesisBackend: Send + Sync {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        native_parameters: &BTreeMap<String, f64>,
    ) -> Result<AudioBuffer, EngineFailure>;
}
