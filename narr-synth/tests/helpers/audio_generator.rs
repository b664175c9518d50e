//! Deterministic test audio
//!
//! Real engines are not available in tests; a steady tone stands in for
//! speech. Its length is derived from the same duration estimate the
//! validator uses, so `stretch = 1.0` always lands inside the accepted
//! duration band.

use std::f32::consts::PI;

use narr_synth::config::ValidationConfig;
use narr_synth::validation::estimate_duration_secs;
use narr_synth::AudioBuffer;

/// Sample rate of generated audio (24 kHz, typical neural TTS output)
pub const TEST_SAMPLE_RATE: u32 = 24_000;

/// 220 Hz tone at a moderate level
pub fn narration_tone(duration_secs: f64) -> AudioBuffer {
    let n = (duration_secs * f64::from(TEST_SAMPLE_RATE)).round() as usize;
    let samples = (0..n)
        .map(|i| 0.25 * (2.0 * PI * 220.0 * i as f32 / TEST_SAMPLE_RATE as f32).sin())
        .collect();
    AudioBuffer::new(samples, TEST_SAMPLE_RATE)
}

/// Expected spoken duration of `text` under the default speaking rate
pub fn expected_secs(text: &str) -> f64 {
    estimate_duration_secs(text, &ValidationConfig::default())
}

/// Tone lasting `stretch` times the expected duration of `text`
pub fn narration_for(text: &str, stretch: f64) -> AudioBuffer {
    narration_tone(expected_secs(text) * stretch)
}
