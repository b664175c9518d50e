//! narr-synth library interface
//!
//! Long-form narration: text chunks in, mastered and validated per-chunk
//! audio out, with every outcome committed to the job's state store.
//!
//! Pipeline per chunk: [`engine`] → [`mastering`] → [`validation`] →
//! [`retry`], run concurrently by [`workflow`].

pub mod assembly;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod mastering;
pub mod process;
pub mod retry;
pub mod safety_gate;
pub mod summary;
pub mod tuner;
pub mod validation;
pub mod workflow;

pub use crate::audio::AudioBuffer;
pub use crate::config::SynthConfig;
pub use crate::error::{EngineFailure, SynthError, SynthResult, TransientKind};
pub use crate::workflow::JobRunner;
