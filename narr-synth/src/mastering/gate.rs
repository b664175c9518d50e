//! Gentle noise gate for sustained low-level sections

use crate::audio::{db_to_linear, linear_to_db, rms, window_samples};

/// Noise gate settings (dB values relative to full scale)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateSettings {
    pub window_ms: f64,
    pub threshold_db: f64,
    pub min_duration_ms: f64,
    pub depth_db: f64,
    pub ramp_ms: f64,
}

/// Attenuate runs of low-level windows
///
/// Only runs of consecutive windows below the threshold that last at least
/// `min_duration_ms` are touched. Each gated run fades down and back up over
/// `ramp_ms` inside the run, so speech next to it keeps unity gain.
/// Returns the number of gated windows.
pub fn apply(samples: &mut [f32], sample_rate: u32, settings: &GateSettings) -> usize {
    if samples.is_empty() || sample_rate == 0 {
        return 0;
    }
    let window = window_samples(sample_rate, settings.window_ms);
    let min_windows = (settings.min_duration_ms / settings.window_ms).ceil().max(1.0) as usize;
    let ramp = window_samples(sample_rate, settings.ramp_ms);
    let depth = db_to_linear(settings.depth_db.min(0.0));

    let quiet: Vec<bool> = samples
        .chunks(window)
        .map(|w| linear_to_db(rms(w)) < settings.threshold_db)
        .collect();

    let mut gated = 0;
    let mut idx = 0;
    while idx < quiet.len() {
        if !quiet[idx] {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx < quiet.len() && quiet[idx] {
            idx += 1;
        }
        let run = idx - start;
        if run < min_windows {
            continue;
        }
        gated += run;

        let first = start * window;
        let last = (idx * window).min(samples.len());
        let len = last - first;
        let ramp = ramp.min(len / 2).max(1);
        for (offset, sample) in samples[first..last].iter_mut().enumerate() {
            let edge = offset.min(len - 1 - offset);
            let gain = if edge < ramp {
                let t = edge as f64 / ramp as f64;
                1.0 + (depth - 1.0) * t
            } else {
                depth
            };
            *sample = (f64::from(*sample) * gain) as f32;
        }
    }
    gated
}
