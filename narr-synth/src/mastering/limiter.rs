//! True-peak estimation and lookahead peak limiting

use std::collections::VecDeque;

use crate::audio::{db_to_linear, linear_to_db};

const OVERSAMPLE: usize = 4;

/// Catmull-Rom interpolation between `p1` and `p2` at `t` in [0, 1]
fn cubic(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

/// Per-sample peak magnitude including inter-sample peaks on both sides
fn peak_envelope(samples: &[f32]) -> Vec<f64> {
    let n = samples.len();
    let at = |i: isize| -> f64 {
        if i < 0 || i as usize >= n {
            0.0
        } else {
            f64::from(samples[i as usize])
        }
    };

    // Largest magnitude on the segment between i and i + 1
    let segment: Vec<f64> = (0..n as isize)
        .map(|i| {
            let (p0, p1, p2, p3) = (at(i - 1), at(i), at(i + 1), at(i + 2));
            (1..OVERSAMPLE)
                .map(|k| cubic(p0, p1, p2, p3, k as f64 / OVERSAMPLE as f64).abs())
                .fold(p1.abs(), f64::max)
        })
        .collect();

    (0..n)
        .map(|i| {
            let before = if i > 0 { segment[i - 1] } else { 0.0 };
            segment[i].max(before)
        })
        .collect()
}

/// Estimated true peak in dBTP
pub fn true_peak_dbtp(samples: &[f32]) -> f64 {
    let peak = peak_envelope(samples).into_iter().fold(0.0, f64::max);
    linear_to_db(peak)
}

/// Result of limiting
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterReport {
    /// Deepest gain reduction applied (dB, >= 0)
    pub max_reduction_db: f64,
    pub true_peak_before_dbtp: f64,
    pub true_peak_after_dbtp: f64,
}

/// Limit `samples` in place so the true peak stays at or below `ceiling_dbtp`
///
/// Gain drops `lookahead` ahead of a peak and recovers with a one-pole
/// release. The gain envelope can itself create small inter-sample overshoots,
/// so the pass repeats a few times; anything left is removed by a static trim.
pub fn limit(
    samples: &mut [f32],
    sample_rate: u32,
    ceiling_dbtp: f64,
    lookahead_ms: f64,
    release_ms: f64,
) -> LimiterReport {
    const MAX_PASSES: usize = 4;

    let before = true_peak_dbtp(samples);
    if samples.is_empty() || before <= ceiling_dbtp {
        return LimiterReport {
            max_reduction_db: 0.0,
            true_peak_before_dbtp: before,
            true_peak_after_dbtp: before,
        };
    }

    let ceiling = db_to_linear(ceiling_dbtp);
    let rate = f64::from(sample_rate.max(1));
    let lookahead = ((lookahead_ms / 1000.0 * rate).round() as usize).max(1);
    let release_coef = 1.0 - (-1.0 / (release_ms.max(0.1) / 1000.0 * rate)).exp();

    let mut min_gain = 1.0f64;
    let mut after = before;
    for _ in 0..MAX_PASSES {
        min_gain = min_gain.min(limit_pass(samples, ceiling, lookahead, release_coef));
        after = true_peak_dbtp(samples);
        if after <= ceiling_dbtp {
            break;
        }
    }

    if after > ceiling_dbtp {
        let trim = db_to_linear(ceiling_dbtp - after - 0.01);
        for s in samples.iter_mut() {
            *s = (f64::from(*s) * trim) as f32;
        }
        min_gain *= trim;
        after = true_peak_dbtp(samples);
    }

    LimiterReport {
        max_reduction_db: -linear_to_db(min_gain),
        true_peak_before_dbtp: before,
        true_peak_after_dbtp: after,
    }
}

/// One envelope pass; returns the lowest gain applied
fn limit_pass(samples: &mut [f32], ceiling: f64, lookahead: usize, release_coef: f64) -> f64 {
    let required: Vec<f64> = peak_envelope(samples)
        .into_iter()
        .map(|p| if p > ceiling { ceiling / p } else { 1.0 })
        .collect();

    // Sliding minimum over [i, i + lookahead]
    let n = samples.len();
    let mut target = vec![1.0; n];
    let mut window: VecDeque<usize> = VecDeque::new();
    for j in (0..n).rev() {
        while window.back().map(|&k| required[k] >= required[j]).unwrap_or(false) {
            window.pop_back();
        }
        window.push_back(j);
        while window.front().map(|&k| k > j + lookahead).unwrap_or(false) {
            window.pop_front();
        }
        target[j] = window.front().map(|&k| required[k]).unwrap_or(1.0);
    }

    let mut gain = 1.0f64;
    let mut min_gain = 1.0f64;
    for (sample, &t) in samples.iter_mut().zip(&target) {
        gain = if t < gain { t } else { gain + (t - gain) * release_coef };
        min_gain = min_gain.min(gain);
        if gain < 1.0 {
            *sample = (f64::from(*sample) * gain) as f32;
        }
    }
    min_gain
}
