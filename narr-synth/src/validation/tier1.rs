//! Tier 1: signal heuristics run on every chunk
//!
//! Check order is fixed so the most basic defect is the one reported:
//! levels → engine error phrases → silence gaps → duration.
//! Silent audio therefore always reports `too_quiet`.

use narr_common::model::{Evidence, FailureReason, ValidationResult, ValidationTier};

use super::silence_detector::SilenceDetector;
use crate::audio::{linear_to_db, rms, window_samples, AudioBuffer, LEVEL_FLOOR_DB};
use crate::config::Thresholds;
use crate::mastering::integrated_loudness;

const LEVEL_WINDOW_MS: f64 = 50.0;

/// Measured levels of a buffer (all finite)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub integrated_lufs: f64,
    pub peak_dbfs: f64,
    pub noise_floor_dbfs: f64,
}

/// Measure loudness, sample peak, and noise floor
///
/// The noise floor is the median level of windows at least
/// `noise_relative_db` below the loudest window; with no such windows it is
/// reported at the measurement floor.
pub fn measure_levels(audio: &AudioBuffer, noise_relative_db: f64) -> Levels {
    let window = window_samples(audio.sample_rate.max(1), LEVEL_WINDOW_MS);
    let window_db: Vec<f64> = audio
        .samples
        .chunks(window)
        .map(|w| linear_to_db(rms(w)))
        .collect();
    let loudest = window_db.iter().copied().fold(LEVEL_FLOOR_DB, f64::max);

    let mut quiet: Vec<f64> = window_db
        .into_iter()
        .filter(|&db| db <= loudest - noise_relative_db)
        .collect();
    quiet.sort_by(f64::total_cmp);
    let noise_floor_dbfs = if quiet.is_empty() || loudest <= LEVEL_FLOOR_DB {
        LEVEL_FLOOR_DB
    } else {
        quiet[quiet.len() / 2]
    };

    Levels {
        integrated_lufs: integrated_loudness(&audio.samples, audio.sample_rate),
        peak_dbfs: audio.peak_dbfs(),
        noise_floor_dbfs,
    }
}

/// First configured phrase found in any of `texts` but not in `source`
///
/// Matching is case-insensitive. Phrases that occur in the source text are
/// legitimate narration and never match.
pub fn find_error_pattern<'t>(
    patterns: &[String],
    texts: impl IntoIterator<Item = &'t str>,
    source: &str,
) -> Option<String> {
    let source = source.to_lowercase();
    let haystack: Vec<String> = texts.into_iter().map(str::to_lowercase).collect();
    patterns
        .iter()
        .map(|p| p.to_lowercase())
        .filter(|p| !p.is_empty() && !source.contains(p.as_str()))
        .find(|p| haystack.iter().any(|h| h.contains(p.as_str())))
}

/// Tier 1 validator
pub struct Tier1Validator<'a> {
    thresholds: &'a Thresholds,
    error_patterns: &'a [String],
}

impl<'a> Tier1Validator<'a> {
    pub fn new(thresholds: &'a Thresholds, error_patterns: &'a [String]) -> Self {
        Self {
            thresholds,
            error_patterns,
        }
    }

    /// Validate mastered `audio` for `source_text`
    pub fn validate(&self, audio: &AudioBuffer, source_text: &str, expected_secs: f64) -> ValidationResult {
        let t = self.thresholds;
        let levels = measure_levels(audio, t.noise_relative_db);
        let actual = audio.duration_secs();
        let ratio = if expected_secs > 0.0 { actual / expected_secs } else { 1.0 };

        let mut evidence = Evidence {
            integrated_lufs: Some(levels.integrated_lufs),
            peak_dbfs: Some(levels.peak_dbfs),
            noise_floor_dbfs: Some(levels.noise_floor_dbfs),
            expected_duration_secs: Some(expected_secs),
            actual_duration_secs: Some(actual),
            duration_ratio: Some(ratio),
            ..Default::default()
        };
        let fail = |reason, evidence, detail: String| {
            ValidationResult::fail(ValidationTier::Tier1, reason, evidence, detail)
        };

        if levels.integrated_lufs < t.min_loudness_lufs {
            return fail(
                FailureReason::TooQuiet,
                evidence,
                format!(
                    "integrated loudness {:.1} LUFS below {:.1}",
                    levels.integrated_lufs, t.min_loudness_lufs
                ),
            );
        }
        if levels.peak_dbfs > t.max_peak_dbfs {
            return fail(
                FailureReason::PeakTooHigh,
                evidence,
                format!("peak {:.2} dBFS above {:.2}", levels.peak_dbfs, t.max_peak_dbfs),
            );
        }
        if levels.noise_floor_dbfs > t.max_noise_floor_dbfs {
            return fail(
                FailureReason::NoiseFloorTooHigh,
                evidence,
                format!(
                    "noise floor {:.1} dBFS above {:.1}",
                    levels.noise_floor_dbfs, t.max_noise_floor_dbfs
                ),
            );
        }

        if let Some(pattern) = find_error_pattern(
            self.error_patterns,
            audio.notes.iter().map(String::as_str),
            source_text,
        ) {
            evidence.matched_pattern = Some(pattern.clone());
            return fail(
                FailureReason::EngineErrorUtterance,
                evidence,
                format!("engine diagnostics contain '{}'", pattern),
            );
        }

        let gap = SilenceDetector::new()
            .with_threshold_db(t.silence_threshold_db.min(0.0))
            .map(|d| d.longest_internal_gap(&audio.samples, audio.sample_rate))
            .unwrap_or(0.0);
        evidence.longest_gap_secs = Some(gap);
        if gap > t.max_silence_gap_secs {
            return fail(
                FailureReason::SilenceGap,
                evidence,
                format!("internal silence of {:.2}s exceeds {:.2}s", gap, t.max_silence_gap_secs),
            );
        }

        if ratio < t.min_duration_ratio || ratio > t.max_duration_ratio {
            return fail(
                FailureReason::DurationMismatch,
                evidence,
                format!(
                    "duration {:.2}s is {:.2}× the expected {:.2}s (allowed {:.2}–{:.2})",
                    actual, ratio, expected_secs, t.min_duration_ratio, t.max_duration_ratio
                ),
            );
        }

        ValidationResult::pass(ValidationTier::Tier1, evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn tone(secs: f64, amp: f32) -> Vec<f32> {
        let n = (secs * f64::from(RATE)) as usize;
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / RATE as f32).sin())
            .collect()
    }

    fn validate(audio: &AudioBuffer, expected: f64) -> ValidationResult {
        let thresholds = Thresholds::strict();
        let patterns = vec!["out of memory".to_string()];
        Tier1Validator::new(&thresholds, &patterns).validate(audio, "Some narration.", expected)
    }

    #[test]
    fn test_clean_tone_passes() {
        let audio = AudioBuffer::new(tone(2.0, 0.2), RATE);
        let result = validate(&audio, 2.0);
        assert!(result.passed, "{:?}", result.detail);
        assert!(result.evidence.longest_gap_secs.is_some());
    }

    #[test]
    fn test_zero_energy_is_too_quiet_even_with_wrong_duration() {
        let audio = AudioBuffer::silence(10.0, RATE);
        let result = validate(&audio, 2.0);

        assert!(!result.passed);
        assert_eq!(result.reason, Some(FailureReason::TooQuiet));
        assert!(result.evidence.integrated_lufs.unwrap().is_finite());
    }

    #[test]
    fn test_long_output_reports_duration_ratio() {
        let audio = AudioBuffer::new(tone(5.0, 0.2), RATE);
        let result = validate(&audio, 2.0);

        assert_eq!(result.reason, Some(FailureReason::DurationMismatch));
        assert!((result.evidence.duration_ratio.unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_internal_gap_detected() {
        let samples = [tone(1.0, 0.2), vec![0.0; 2 * RATE as usize], tone(1.0, 0.2)].concat();
        let result = validate(&AudioBuffer::new(samples, RATE), 4.0);

        assert_eq!(result.reason, Some(FailureReason::SilenceGap));
    }

    #[test]
    fn test_noise_bed_is_flagged() {
        let mut samples = tone(1.0, 0.3);
        samples.extend((0..RATE as usize).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }));
        samples.extend(tone(1.0, 0.3));
        let result = validate(&AudioBuffer::new(samples, RATE), 3.0);

        assert_eq!(result.reason, Some(FailureReason::NoiseFloorTooHigh));
    }

    #[test]
    fn test_engine_error_note_is_flagged() {
        let mut audio = AudioBuffer::new(tone(2.0, 0.2), RATE);
        audio.notes.push("RuntimeError: CUDA out of memory".to_string());
        let result = validate(&audio, 2.0);

        assert_eq!(result.reason, Some(FailureReason::EngineErrorUtterance));
        assert_eq!(result.evidence.matched_pattern.as_deref(), Some("out of memory"));
    }

    #[test]
    fn test_pattern_present_in_source_is_ignored() {
        let patterns = vec!["as an ai".to_string()];
        let found = find_error_pattern(&patterns, ["... as an AI ..."], "She spoke as an AI would.");
        assert!(found.is_none());
        let found = find_error_pattern(&patterns, ["... as an AI ..."], "A plain sentence.");
        assert_eq!(found.as_deref(), Some("as an ai"));
    }
}
