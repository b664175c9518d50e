//! Audio mastering stage
//!
//! Three steps, in order:
//! 1. Loudness normalization to the integrated-loudness target
//! 2. True-peak limiting below the ceiling
//! 3. Noise gate on sustained low-level sections
//!
//! The stage is pure: same input and settings, same output.

mod gate;
mod limiter;
mod loudness;

pub use gate::GateSettings;
pub use limiter::{true_peak_dbtp, LimiterReport};
pub use loudness::integrated_loudness;

use crate::audio::{db_to_linear, AudioBuffer, LEVEL_FLOOR_DB};
use crate::config::MasteringConfig;

/// Mastered audio plus what was done to it
#[derive(Debug, Clone, PartialEq)]
pub struct MasteredBuffer {
    pub audio: AudioBuffer,
    pub input_lufs: f64,
    pub output_lufs: f64,
    /// Normalization gain (dB), after the gain cap
    pub applied_gain_db: f64,
    pub limiter: LimiterReport,
    pub gated_windows: usize,
}

/// Master `samples` recorded at `sample_rate`
pub fn master(samples: &[f32], sample_rate: u32, config: &MasteringConfig) -> MasteredBuffer {
    let input_lufs = integrated_loudness(samples, sample_rate);
    let mut out = samples.to_vec();

    let applied_gain_db = if input_lufs <= LEVEL_FLOOR_DB {
        // Nothing measurable to normalize
        0.0
    } else {
        (config.target_lufs - input_lufs).min(config.max_gain_db)
    };
    if applied_gain_db != 0.0 {
        let g = db_to_linear(applied_gain_db);
        for s in out.iter_mut() {
            *s = (f64::from(*s) * g) as f32;
        }
    }

    let limiter = limiter::limit(
        &mut out,
        sample_rate,
        config.true_peak_ceiling_dbtp,
        config.limiter_lookahead_ms,
        config.limiter_release_ms,
    );

    let gated_windows = if config.gate_enabled {
        gate::apply(
            &mut out,
            sample_rate,
            &GateSettings {
                window_ms: config.gate_window_ms,
                threshold_db: config.gate_threshold_db,
                min_duration_ms: config.gate_min_duration_ms,
                depth_db: config.gate_depth_db,
                ramp_ms: config.gate_ramp_ms,
            },
        )
    } else {
        0
    };

    let output_lufs = integrated_loudness(&out, sample_rate);
    MasteredBuffer {
        audio: AudioBuffer::new(out, sample_rate),
        input_lufs,
        output_lufs,
        applied_gain_db,
        limiter,
        gated_windows,
    }
}

/// Master an engine buffer, keeping its diagnostic notes
pub fn master_buffer(buffer: &AudioBuffer, config: &MasteringConfig) -> MasteredBuffer {
    let mut mastered = master(&buffer.samples, buffer.sample_rate, config);
    mastered.audio.notes = buffer.notes.clone();
    mastered
}
