//! Tiered chunk validation
//!
//! - Tier 1: signal heuristics on every chunk ([`tier1`])
//! - Tier 2: transcript comparison on a deterministic sample ([`sampling`])
//! - Tier 3: transcript comparison on every chunk, when enabled
//!
//! Transcription problems never fail a chunk; the transcript tier is skipped
//! and the Tier 1 verdict stands.

mod phonemes;
mod sampling;
mod silence_detector;
mod tier1;
mod transcriber;
mod transcript;

pub use phonemes::{estimate_duration_secs, estimate_phonemes};
pub use sampling::Sampler;
pub use silence_detector::{SilenceDetector, SilenceError, SilenceRegion};
pub use tier1::{find_error_pattern, measure_levels, Levels, Tier1Validator};
pub use transcriber::{CommandTranscriber, Transcriber};
pub use transcript::{check_transcript, normalize_words, word_error_rate};

use std::sync::Arc;

use narr_common::model::{ValidationResult, ValidationTier};
use narr_common::ChunkId;
use tracing::{debug, warn};

use crate::audio::AudioBuffer;
use crate::config::{ThresholdProfile, ValidationConfig};

/// Validator for one job
pub struct ValidationPipeline {
    config: ValidationConfig,
    transcriber: Option<Arc<dyn Transcriber>>,
    sampler: Sampler,
}

impl ValidationPipeline {
    pub fn new(
        config: ValidationConfig,
        transcriber: Option<Arc<dyn Transcriber>>,
        sampler: Sampler,
    ) -> Self {
        if config.profile == ThresholdProfile::Lenient {
            warn!(
                profile = "lenient",
                "Lenient validation thresholds are active; defects may pass unnoticed"
            );
        }
        Self {
            config,
            transcriber,
            sampler,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Transcript tier this chunk gets, if any
    fn transcript_tier(&self, chunk_id: ChunkId) -> Option<ValidationTier> {
        if self.config.tier3_enabled {
            Some(ValidationTier::Tier3)
        } else if self.config.tier2_enabled && self.sampler.is_sampled(chunk_id) {
            Some(ValidationTier::Tier2)
        } else {
            None
        }
    }

    /// Validate mastered audio for one chunk
    pub fn validate(
        &self,
        chunk_id: ChunkId,
        source_text: &str,
        expected_secs: f64,
        audio: &AudioBuffer,
    ) -> ValidationResult {
        let thresholds = self.config.thresholds();
        let tier1 = Tier1Validator::new(thresholds, &self.config.error_patterns)
            .validate(audio, source_text, expected_secs);
        if !tier1.passed {
            return tier1;
        }

        let (tier, transcriber) = match (self.transcript_tier(chunk_id), &self.transcriber) {
            (Some(tier), Some(t)) => (tier, t),
            (Some(tier), None) => {
                debug!(chunk_id = chunk_id.0, %tier, "No transcriber configured, skipping");
                return tier1;
            }
            (None, _) => return tier1,
        };

        let transcript = match transcriber.transcribe(audio) {
            Ok(text) => text,
            Err(e) => {
                warn!(chunk_id = chunk_id.0, %tier, error = %e, "Transcription failed, keeping Tier 1 verdict");
                return tier1;
            }
        };

        let mut result = check_transcript(
            tier,
            source_text,
            &transcript,
            thresholds,
            &self.config.error_patterns,
        );
        result.evidence.absorb(tier1.evidence);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranscriptionError;
    use narr_common::model::FailureReason;

    const RATE: u32 = 16_000;
    const TEXT: &str = "one two three four five six seven eight";

    struct Fixed(Result<String, ()>);

    impl Transcriber for Fixed {
        fn transcribe(&self, _audio: &AudioBuffer) -> Result<String, TranscriptionError> {
            self.0
                .clone()
                .map_err(|_| TranscriptionError::Unavailable("offline".into()))
        }
    }

    fn tone(secs: f64) -> AudioBuffer {
        let n = (secs * f64::from(RATE)) as usize;
        let samples = (0..n)
            .map(|i| 0.2 * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / RATE as f32).sin())
            .collect();
        AudioBuffer::new(samples, RATE)
    }

    fn pipeline(config: ValidationConfig, transcript: Result<&str, ()>) -> ValidationPipeline {
        let sampler = Sampler::new(0, config.sample_fraction, config.sample_edge_count, &[ChunkId(1)]);
        let transcriber: Arc<dyn Transcriber> = Arc::new(Fixed(transcript.map(str::to_string)));
        ValidationPipeline::new(config, Some(transcriber), sampler)
    }

    #[test]
    fn test_sampled_chunk_runs_tier2() {
        let p = pipeline(ValidationConfig::default(), Ok(TEXT));
        let result = p.validate(ChunkId(1), TEXT, 2.0, &tone(2.0));

        assert!(result.passed);
        assert_eq!(result.tier, ValidationTier::Tier2);
        assert!(result.evidence.integrated_lufs.is_some());
        assert_eq!(result.evidence.word_error_rate, Some(0.0));
    }

    #[test]
    fn test_tier3_checks_every_chunk() {
        let config = ValidationConfig {
            tier3_enabled: true,
            ..Default::default()
        };
        let p = pipeline(config, Ok("one two"));
        let result = p.validate(ChunkId(1), TEXT, 2.0, &tone(2.0));

        assert_eq!(result.tier, ValidationTier::Tier3);
        assert_eq!(result.reason, Some(FailureReason::Truncation));
    }

    #[test]
    fn test_transcriber_failure_keeps_tier1_verdict() {
        let p = pipeline(ValidationConfig::default(), Err(()));
        let result = p.validate(ChunkId(1), TEXT, 2.0, &tone(2.0));

        assert!(result.passed);
        assert_eq!(result.tier, ValidationTier::Tier1);
    }

    #[test]
    fn test_tier1_failure_short_circuits() {
        let p = pipeline(ValidationConfig::default(), Ok(TEXT));
        let result = p.validate(ChunkId(1), TEXT, 2.0, &AudioBuffer::silence(2.0, RATE));

        assert_eq!(result.tier, ValidationTier::Tier1);
        assert_eq!(result.reason, Some(FailureReason::TooQuiet));
    }
}
