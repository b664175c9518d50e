//! Test helpers for narr-synth integration tests
//!
//! - ScriptedEngine: in-process synthesis backend driven by a closure
//! - QueuedTranscriber: transcriber replaying canned transcripts
//! - audio_generator: narration-like tones sized from the duration estimate
//! - job_fixture: test configuration, descriptors, and runner setup

#![allow(dead_code)]

pub mod audio_generator;
pub mod job_fixture;
pub mod scripted_engine;

pub use audio_generator::{expected_secs, narration_for, narration_tone, TEST_SAMPLE_RATE};
pub use job_fixture::{
    descriptors, open_runner, read_record, single_engine, speed_profile, test_config, DOCUMENT,
};
pub use scripted_engine::{Call, QueuedTranscriber, ScriptedEngine};
