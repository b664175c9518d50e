//! Silence region detection for pause validation

use thiserror::Error;

use crate::audio::{db_to_linear, rms, window_samples};

/// Silence detection errors
#[derive(Debug, Error)]
pub enum SilenceError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
}

/// Silence region in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceRegion {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl SilenceRegion {
    pub fn new(start_secs: f64, end_secs: f64) -> Self {
        Self { start_secs, end_secs }
    }

    pub fn duration(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Windowed RMS silence detector
pub struct SilenceDetector {
    /// Window level below which audio is silent (default: -50 dB)
    threshold_db: f64,

    /// Shortest region reported (default: 0.1 s)
    min_duration_secs: f64,

    /// RMS window length (default: 50 ms)
    window_ms: f64,
}

impl SilenceDetector {
    pub fn new() -> Self {
        Self {
            threshold_db: -50.0,
            min_duration_secs: 0.1,
            window_ms: 50.0,
        }
    }

    pub fn with_threshold_db(mut self, threshold_db: f64) -> Result<Self, SilenceError> {
        if threshold_db > 0.0 {
            return Err(SilenceError::InvalidThreshold(
                "Threshold must be negative dB".to_string(),
            ));
        }
        self.threshold_db = threshold_db;
        Ok(self)
    }

    /// Detect silence regions, in order
    pub fn detect(&self, samples: &[f32], sample_rate: u32) -> Vec<SilenceRegion> {
        if samples.is_empty() || sample_rate == 0 {
            return Vec::new();
        }

        let threshold = db_to_linear(self.threshold_db);
        let window = window_samples(sample_rate, self.window_ms);
        let rate = f64::from(sample_rate);

        let mut regions = Vec::new();
        let mut silence_start: Option<usize> = None;

        let close = |start: usize, end: usize, regions: &mut Vec<SilenceRegion>| {
            let region = SilenceRegion::new(start as f64 / rate, end as f64 / rate);
            if region.duration() >= self.min_duration_secs {
                regions.push(region);
            }
        };

        for (idx, chunk) in samples.chunks(window).enumerate() {
            let position = idx * window;
            if rms(chunk) < threshold {
                silence_start.get_or_insert(position);
            } else if let Some(start) = silence_start.take() {
                close(start, position, &mut regions);
            }
        }
        if let Some(start) = silence_start {
            close(start, samples.len(), &mut regions);
        }

        regions
    }

    /// Longest silence with audio on both sides, in seconds
    ///
    /// Leading and trailing silence are engine padding, not pauses.
    pub fn longest_internal_gap(&self, samples: &[f32], sample_rate: u32) -> f64 {
        let total = samples.len() as f64 / f64::from(sample_rate.max(1));
        self.detect(samples, sample_rate)
            .into_iter()
            .filter(|r| r.start_secs > 0.0 && r.end_secs < total)
            .map(|r| r.duration())
            .fold(0.0, f64::max)
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn sound(secs: f64) -> Vec<f32> {
        vec![0.5; (secs * f64::from(RATE)) as usize]
    }

    fn hush(secs: f64) -> Vec<f32> {
        vec![0.0001; (secs * f64::from(RATE)) as usize]
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(SilenceDetector::new().with_threshold_db(10.0).is_err());
    }

    #[test]
    fn test_detect_silence_simple() {
        let samples = [sound(1.0), hush(2.0), sound(1.0)].concat();
        let regions = SilenceDetector::new().detect(&samples, RATE);

        assert_eq!(regions.len(), 1);
        assert!((regions[0].start_secs - 1.0).abs() < 0.06);
        assert!((regions[0].duration() - 2.0).abs() < 0.06);
    }

    #[test]
    fn test_minimum_duration_filter() {
        let detector = SilenceDetector {
            min_duration_secs: 0.5,
            ..SilenceDetector::new()
        };
        let samples = [sound(1.0), hush(0.2), sound(1.0), hush(1.0), sound(0.5)].concat();

        assert_eq!(detector.detect(&samples, RATE).len(), 1);
    }

    #[test]
    fn test_edges_do_not_count_as_gaps() {
        let samples = [hush(3.0), sound(1.0), hush(0.6), sound(1.0), hush(3.0)].concat();
        let gap = SilenceDetector::new().longest_internal_gap(&samples, RATE);

        assert!((gap - 0.6).abs() < 0.06, "gap {}", gap);
    }
}
