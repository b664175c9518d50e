//! Integrated loudness (ITU-R BS.1770, mono)

use std::f64::consts::PI;

use crate::audio::LEVEL_FLOOR_DB;

const BLOCK_SECS: f64 = 0.4;
const STEP_SECS: f64 = 0.1;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;

/// Second-order IIR section (direct form I)
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn run(&self, input: &[f64]) -> Vec<f64> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        input
            .iter()
            .map(|&x| {
                let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

/// Pre-filter: high shelf (+4 dB above ~1.7 kHz)
fn shelf(sample_rate: f64) -> Biquad {
    let f0 = 1681.974450955533;
    let gain_db = 3.999843853973347;
    let q = 0.7071752369554196;

    let k = (PI * f0 / sample_rate).tan();
    let vh = 10f64.powf(gain_db / 20.0);
    let vb = vh.powf(0.4996667741545416);
    let a0 = 1.0 + k / q + k * k;
    Biquad {
        b0: (vh + vb * k / q + k * k) / a0,
        b1: 2.0 * (k * k - vh) / a0,
        b2: (vh - vb * k / q + k * k) / a0,
        a1: 2.0 * (k * k - 1.0) / a0,
        a2: (1.0 - k / q + k * k) / a0,
    }
}

/// RLB weighting: high pass at ~38 Hz
fn high_pass(sample_rate: f64) -> Biquad {
    let f0 = 38.13547087602444;
    let q = 0.5003270373238773;

    let k = (PI * f0 / sample_rate).tan();
    let a0 = 1.0 + k / q + k * k;
    Biquad {
        b0: 1.0,
        b1: -2.0,
        b2: 1.0,
        a1: 2.0 * (k * k - 1.0) / a0,
        a2: (1.0 - k / q + k * k) / a0,
    }
}

fn block_loudness(mean_square: f64) -> f64 {
    -0.691 + 10.0 * mean_square.log10()
}

/// Integrated loudness in LUFS
///
/// Returns [`LEVEL_FLOOR_DB`] for silent input or when every block falls
/// below the absolute gate. Buffers shorter than one block are measured as a
/// single block.
pub fn integrated_loudness(samples: &[f32], sample_rate: u32) -> f64 {
    if samples.is_empty() || sample_rate == 0 {
        return LEVEL_FLOOR_DB;
    }
    let rate = f64::from(sample_rate);
    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let weighted = high_pass(rate).run(&shelf(rate).run(&input));

    let block = ((BLOCK_SECS * rate).round() as usize).max(1);
    let step = ((STEP_SECS * rate).round() as usize).max(1);

    let mut powers = Vec::new();
    if weighted.len() < block {
        powers.push(mean_square(&weighted));
    } else {
        let mut start = 0;
        while start + block <= weighted.len() {
            powers.push(mean_square(&weighted[start..start + block]));
            start += step;
        }
    }

    let above_absolute: Vec<f64> = powers
        .into_iter()
        .filter(|&z| z > 0.0 && block_loudness(z) > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.is_empty() {
        return LEVEL_FLOOR_DB;
    }

    let relative_gate = block_loudness(mean(&above_absolute)) + RELATIVE_GATE_LU;
    let gated: Vec<f64> = above_absolute
        .into_iter()
        .filter(|&z| block_loudness(z) > relative_gate)
        .collect();
    if gated.is_empty() {
        return LEVEL_FLOOR_DB;
    }

    block_loudness(mean(&gated)).max(LEVEL_FLOOR_DB)
}

fn mean_square(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64
}

fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}
