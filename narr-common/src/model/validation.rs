//! Validation results and remediation vocabulary
//!
//! These types are persisted inside the state record, so every variant name
//! is part of the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation tier that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationTier {
    /// Cheap signal heuristics, every chunk
    Tier1,
    /// Transcription check, sampled chunks
    Tier2,
    /// Transcription check, every chunk
    Tier3,
}

impl fmt::Display for ValidationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tier1 => f.write_str("tier1"),
            Self::Tier2 => f.write_str("tier2"),
            Self::Tier3 => f.write_str("tier3"),
        }
    }
}

/// Validation failure reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DurationMismatch,
    SilenceGap,
    TooQuiet,
    PeakTooHigh,
    NoiseFloorTooHigh,
    HighWer,
    Truncation,
    Repetition,
    /// A known engine error phrase was found in diagnostics or transcript
    EngineErrorUtterance,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DurationMismatch => "duration_mismatch",
            Self::SilenceGap => "silence_gap",
            Self::TooQuiet => "too_quiet",
            Self::PeakTooHigh => "peak_too_high",
            Self::NoiseFloorTooHigh => "noise_floor_too_high",
            Self::HighWer => "high_wer",
            Self::Truncation => "truncation",
            Self::Repetition => "repetition",
            Self::EngineErrorUtterance => "engine_error_utterance",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric evidence gathered by a validation pass
///
/// All values are finite. Levels of silent audio are clamped to the
/// measurement floor rather than stored as `-inf`, which JSON cannot carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrated_lufs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_dbfs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_floor_dbfs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_secs: Option<f64>,
    /// actual / expected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longest_gap_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_error_rate: Option<f64>,
    /// transcript words / reference words
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_word_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeated_ngram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
}

impl Evidence {
    /// Merge `other` into `self`, keeping existing values
    pub fn absorb(&mut self, other: Evidence) {
        macro_rules! take {
            ($($field:ident),*) => {
                $( if self.$field.is_none() { self.$field = other.$field; } )*
            };
        }
        take!(
            integrated_lufs,
            peak_dbfs,
            noise_floor_dbfs,
            expected_duration_secs,
            actual_duration_secs,
            duration_ratio,
            longest_gap_secs,
            word_error_rate,
            transcript_word_ratio,
            repeated_ngram,
            matched_pattern
        );
    }
}

/// Outcome of one validation pass (immutable once created)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub reason: Option<FailureReason>,
    /// Highest tier that ran (on pass) or the tier that failed
    pub tier: ValidationTier,
    pub evidence: Evidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn pass(tier: ValidationTier, evidence: Evidence) -> Self {
        Self {
            passed: true,
            reason: None,
            tier,
            evidence,
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn fail(
        tier: ValidationTier,
        reason: FailureReason,
        evidence: Evidence,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            tier,
            evidence,
            detail: Some(detail.into()),
            created_at: Utc::now(),
        }
    }

    /// Map a failed result onto the remediation vocabulary
    ///
    /// Duration mismatches split on the measured ratio so engines can react
    /// in opposite directions to too-long and too-short output.
    pub fn remediation_trigger(&self) -> Option<RemediationTrigger> {
        let reason = self.reason?;
        let trigger = match reason {
            FailureReason::DurationMismatch => match self.evidence.duration_ratio {
                Some(ratio) if ratio < 1.0 => RemediationTrigger::DurationTooShort,
                _ => RemediationTrigger::DurationTooLong,
            },
            FailureReason::SilenceGap => RemediationTrigger::SilenceGap,
            FailureReason::TooQuiet => RemediationTrigger::TooQuiet,
            FailureReason::PeakTooHigh => RemediationTrigger::PeakTooHigh,
            FailureReason::NoiseFloorTooHigh => RemediationTrigger::NoiseFloorTooHigh,
            FailureReason::HighWer => RemediationTrigger::HighWer,
            FailureReason::Truncation => RemediationTrigger::Truncation,
            FailureReason::Repetition => RemediationTrigger::Repetition,
            FailureReason::EngineErrorUtterance => RemediationTrigger::EngineErrorUtterance,
        };
        Some(trigger)
    }

    /// Distance from acceptance for comparable failures, `None` when the
    /// reason carries no scalar measure
    pub fn severity(&self) -> Option<f64> {
        match self.reason? {
            FailureReason::DurationMismatch => self.evidence.duration_ratio.map(|r| r.ln().abs()),
            FailureReason::SilenceGap => self.evidence.longest_gap_secs,
            FailureReason::TooQuiet => self.evidence.integrated_lufs.map(|l| -l),
            FailureReason::PeakTooHigh => self.evidence.peak_dbfs,
            FailureReason::NoiseFloorTooHigh => self.evidence.noise_floor_dbfs,
            FailureReason::HighWer => self.evidence.word_error_rate,
            FailureReason::Truncation => self.evidence.transcript_word_ratio.map(|r| -r),
            FailureReason::Repetition | FailureReason::EngineErrorUtterance => None,
        }
    }

    /// Whether `next` is an improvement over this failed result
    pub fn improved_by(&self, next: &ValidationResult) -> bool {
        if next.passed {
            return true;
        }
        if next.reason != self.reason {
            return false;
        }
        match (self.severity(), next.severity()) {
            (Some(before), Some(after)) => after < before,
            _ => false,
        }
    }
}

/// Failure classes the remediation tables are keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationTrigger {
    DurationTooLong,
    DurationTooShort,
    SilenceGap,
    TooQuiet,
    PeakTooHigh,
    NoiseFloorTooHigh,
    HighWer,
    Truncation,
    Repetition,
    EngineErrorUtterance,
    /// Timeout or resource exhaustion reported by the engine
    EngineTransient,
}

impl fmt::Display for RemediationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DurationTooLong => "duration_too_long",
            Self::DurationTooShort => "duration_too_short",
            Self::SilenceGap => "silence_gap",
            Self::TooQuiet => "too_quiet",
            Self::PeakTooHigh => "peak_too_high",
            Self::NoiseFloorTooHigh => "noise_floor_too_high",
            Self::HighWer => "high_wer",
            Self::Truncation => "truncation",
            Self::Repetition => "repetition",
            Self::EngineErrorUtterance => "engine_error_utterance",
            Self::EngineTransient => "engine_transient",
        };
        f.write_str(s)
    }
}

/// Concrete remediation applied before the next attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemediationAction {
    AdjustParameter { name: String, from: f64, to: f64 },
    RotateVoice { from: Option<String>, to: String },
    SwitchEngine { from: String, to: String },
    /// Same engine, voice, and parameters
    RetryUnchanged,
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdjustParameter { name, from, to } => {
                write!(f, "adjust {} {:.3} -> {:.3}", name, from, to)
            }
            Self::RotateVoice { from, to } => write!(
                f,
                "rotate voice {} -> {}",
                from.as_deref().unwrap_or("<default>"),
                to
            ),
            Self::SwitchEngine { from, to } => write!(f, "switch engine {} -> {}", from, to),
            Self::RetryUnchanged => f.write_str("retry unchanged"),
        }
    }
}
