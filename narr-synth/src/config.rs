//! narr-synth configuration (`narr.toml`)
//!
//! Every field has a serde default so a partial file, or none at all, yields
//! a working configuration. [`SynthConfig::validate`] rejects combinations
//! that would parse but cannot work.

use narr_common::config::{LoggingConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineProfile, RuleAction};
use crate::error::{SynthError, SynthResult};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthConfig {
    /// Job root folder (CLI and `NARR_ROOT_FOLDER` take precedence)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Engine for chunks without an override (default: first engine)
    #[serde(default)]
    pub default_engine: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub mastering: MasteringConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub tuner: TunerConfig,

    #[serde(default)]
    pub engines: Vec<EngineProfile>,

    #[serde(default)]
    pub transcriber: Option<TranscriberConfig>,
}

impl SynthConfig {
    /// Engine id used for chunks without an override
    pub fn default_engine_id(&self) -> Option<&str> {
        self.default_engine
            .as_deref()
            .or_else(|| self.engines.first().map(|e| e.id.as_str()))
    }

    pub fn validate(&self) -> SynthResult<()> {
        let bad = |msg: String| Err(SynthError::Config(msg));

        if self.store.backup_count == 0 {
            return bad("store.backup_count must be at least 1".into());
        }
        if self.pool.min_workers == 0 {
            return bad("pool.min_workers must be at least 1".into());
        }
        if self.pool.min_workers > self.pool.max_workers {
            return bad(format!(
                "pool.min_workers ({}) exceeds pool.max_workers ({})",
                self.pool.min_workers, self.pool.max_workers
            ));
        }
        if self.pool.chunk_timeout_ms == 0 {
            return bad("pool.chunk_timeout_ms must be positive".into());
        }
        if self.retry.attempts_per_engine == 0 || self.retry.max_total_attempts == 0 {
            return bad("retry caps must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.validation.sample_fraction) {
            return bad("validation.sample_fraction must be within [0, 1]".into());
        }
        if self.validation.phonemes_per_sec <= 0.0 {
            return bad("validation.phonemes_per_sec must be positive".into());
        }
        for (name, t) in [("strict", &self.validation.strict), ("lenient", &self.validation.lenient)] {
            if !(t.min_duration_ratio > 0.0 && t.min_duration_ratio < t.max_duration_ratio) {
                return bad(format!(
                    "validation.{}: duration ratio bounds inverted ({} >= {})",
                    name, t.min_duration_ratio, t.max_duration_ratio
                ));
            }
            if t.repetition_ngram == 0 {
                return bad(format!("validation.{}.repetition_ngram must be at least 1", name));
            }
        }
        if self.mastering.true_peak_ceiling_dbtp > 0.0 {
            return bad("mastering.true_peak_ceiling_dbtp must not exceed 0 dBTP".into());
        }

        let mut ids = BTreeSet::new();
        for engine in &self.engines {
            if !ids.insert(engine.id.as_str()) {
                return bad(format!("duplicate engine id '{}'", engine.id));
            }
            if engine.concurrency_cost <= 0.0 {
                return bad(format!("engine {}: concurrency_cost must be positive", engine.id));
            }
            if engine.max_input_chars == 0 {
                return bad(format!("engine {}: max_input_chars must be positive", engine.id));
            }
            for rule in &engine.remediation {
                if let RuleAction::AdjustParameter { name, min: Some(lo), max: Some(hi), .. } =
                    &rule.action
                {
                    if lo > hi {
                        return bad(format!(
                            "engine {}: bounds for {} inverted ({} > {})",
                            engine.id, name, lo, hi
                        ));
                    }
                }
            }
        }
        for engine in &self.engines {
            if let Some(fallback) = &engine.fallback {
                if fallback == &engine.id {
                    return bad(format!("engine {} falls back to itself", engine.id));
                }
                if !ids.contains(fallback.as_str()) {
                    return bad(format!(
                        "engine {}: unknown fallback engine '{}'",
                        engine.id, fallback
                    ));
                }
            }
        }
        if let Some(default) = &self.default_engine {
            if !ids.contains(default.as_str()) {
                return bad(format!("default_engine '{}' is not configured", default));
            }
        }
        Ok(())
    }
}

/// Worker pool sizing and load shedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Lower bound on workers (default: 1)
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper bound on workers (default: 4)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-attempt synthesis timeout (default: 300000 ms)
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Retire workers under sustained CPU pressure (default: true)
    #[serde(default = "default_true")]
    pub load_monitor: bool,

    /// 1-minute load average per CPU considered pressure (default: 1.5)
    #[serde(default = "default_cpu_pressure_threshold")]
    pub cpu_pressure_threshold: f64,

    /// Consecutive pressured samples before retiring a worker (default: 3)
    #[serde(default = "default_pressure_samples")]
    pub pressure_samples: u32,

    /// Load sampling interval (default: 5000 ms)
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl PoolConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            load_monitor: default_true(),
            cpu_pressure_threshold: default_cpu_pressure_threshold(),
            pressure_samples: default_pressure_samples(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

/// Attempt caps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts on one engine before falling back (default: 3)
    #[serde(default = "default_attempts_per_engine")]
    pub attempts_per_engine: u32,

    /// Attempts per chunk across all engines (default: 6)
    #[serde(default = "default_max_total_attempts")]
    pub max_total_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts_per_engine: default_attempts_per_engine(),
            max_total_attempts: default_max_total_attempts(),
        }
    }
}

/// Named threshold set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdProfile {
    Strict,
    Lenient,
}

/// Acceptance thresholds for the validation tiers
///
/// Fields missing from a TOML table take their strict values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_duration_ratio: f64,
    pub max_duration_ratio: f64,
    /// Longest tolerated internal pause
    pub max_silence_gap_secs: f64,
    /// Window level below which audio counts as silence
    pub silence_threshold_db: f64,
    pub min_loudness_lufs: f64,
    pub max_peak_dbfs: f64,
    pub max_noise_floor_dbfs: f64,
    /// Windows this far below the loudest window count toward the noise floor
    pub noise_relative_db: f64,
    pub max_wer: f64,
    /// Minimum transcript/reference word ratio before reporting truncation
    pub min_transcript_ratio: f64,
    pub repetition_ngram: usize,
    /// Extra occurrences of an n-gram (over the source) that count as repetition
    pub repetition_min_excess: usize,
}

impl Thresholds {
    pub fn strict() -> Self {
        Self {
            min_duration_ratio: 0.6,
            max_duration_ratio: 1.7,
            max_silence_gap_secs: 1.2,
            silence_threshold_db: -50.0,
            min_loudness_lufs: -35.0,
            max_peak_dbfs: -0.3,
            max_noise_floor_dbfs: -45.0,
            noise_relative_db: 25.0,
            max_wer: 0.2,
            min_transcript_ratio: 0.75,
            repetition_ngram: 3,
            repetition_min_excess: 2,
        }
    }

    pub fn lenient() -> Self {
        Self {
            min_duration_ratio: 0.4,
            max_duration_ratio: 2.5,
            max_silence_gap_secs: 2.5,
            silence_threshold_db: -55.0,
            min_loudness_lufs: -45.0,
            max_peak_dbfs: 0.0,
            max_noise_floor_dbfs: -35.0,
            noise_relative_db: 25.0,
            max_wer: 0.4,
            min_transcript_ratio: 0.5,
            repetition_ngram: 3,
            repetition_min_excess: 3,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::strict()
    }
}

/// Validation tiers, sampling, and threshold profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Active threshold set (default: strict)
    #[serde(default = "default_profile")]
    pub profile: ThresholdProfile,

    /// Transcribe sampled chunks (default: true; needs a transcriber)
    #[serde(default = "default_true")]
    pub tier2_enabled: bool,

    /// Transcribe every chunk (default: false)
    #[serde(default)]
    pub tier3_enabled: bool,

    /// Chunks at each end of the job that are always sampled (default: 3)
    #[serde(default = "default_sample_edge_count")]
    pub sample_edge_count: usize,

    /// Fraction of the remaining chunks sampled (default: 0.1)
    #[serde(default = "default_sample_fraction")]
    pub sample_fraction: f64,

    /// Sampling seed; derived from the job id when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Speaking rate for duration estimates (default: 12.5)
    #[serde(default = "default_phonemes_per_sec")]
    pub phonemes_per_sec: f64,

    /// Pause per comma, colon, or dash (default: 0.2 s)
    #[serde(default = "default_comma_pause_secs")]
    pub comma_pause_secs: f64,

    /// Pause per sentence end (default: 0.4 s)
    #[serde(default = "default_sentence_pause_secs")]
    pub sentence_pause_secs: f64,

    /// Case-insensitive phrases engines emit instead of speech
    #[serde(default = "default_error_patterns")]
    pub error_patterns: Vec<String>,

    #[serde(default = "Thresholds::strict")]
    pub strict: Thresholds,

    #[serde(default = "Thresholds::lenient")]
    pub lenient: Thresholds,
}

impl ValidationConfig {
    pub fn thresholds(&self) -> &Thresholds {
        match self.profile {
            ThresholdProfile::Strict => &self.strict,
            ThresholdProfile::Lenient => &self.lenient,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            tier2_enabled: default_true(),
            tier3_enabled: false,
            sample_edge_count: default_sample_edge_count(),
            sample_fraction: default_sample_fraction(),
            seed: None,
            phonemes_per_sec: default_phonemes_per_sec(),
            comma_pause_secs: default_comma_pause_secs(),
            sentence_pause_secs: default_sentence_pause_secs(),
            error_patterns: default_error_patterns(),
            strict: Thresholds::strict(),
            lenient: Thresholds::lenient(),
        }
    }
}

/// Mastering chain settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteringConfig {
    /// Integrated loudness target (default: -18 LUFS)
    #[serde(default = "default_target_lufs")]
    pub target_lufs: f64,

    /// Largest gain loudness normalization may apply (default: +24 dB)
    #[serde(default = "default_max_gain_db")]
    pub max_gain_db: f64,

    /// Limiter ceiling (default: -1.0 dBTP)
    #[serde(default = "default_true_peak_ceiling")]
    pub true_peak_ceiling_dbtp: f64,

    /// Limiter lookahead (default: 5 ms)
    #[serde(default = "default_lookahead_ms")]
    pub limiter_lookahead_ms: f64,

    /// Limiter release time constant (default: 80 ms)
    #[serde(default = "default_release_ms")]
    pub limiter_release_ms: f64,

    /// Apply the noise gate (default: true)
    #[serde(default = "default_true")]
    pub gate_enabled: bool,

    /// Gate window length (default: 20 ms)
    #[serde(default = "default_gate_window_ms")]
    pub gate_window_ms: f64,

    /// Window level below which the gate may close (default: -50 dBFS)
    #[serde(default = "default_gate_threshold_db")]
    pub gate_threshold_db: f64,

    /// Shortest low-level run that is gated (default: 150 ms)
    #[serde(default = "default_gate_min_duration_ms")]
    pub gate_min_duration_ms: f64,

    /// Attenuation of gated runs (default: -12 dB)
    #[serde(default = "default_gate_depth_db")]
    pub gate_depth_db: f64,

    /// Fade in/out at gated run edges (default: 5 ms)
    #[serde(default = "default_gate_ramp_ms")]
    pub gate_ramp_ms: f64,
}

impl Default for MasteringConfig {
    fn default() -> Self {
        Self {
            target_lufs: default_target_lufs(),
            max_gain_db: default_max_gain_db(),
            true_peak_ceiling_dbtp: default_true_peak_ceiling(),
            limiter_lookahead_ms: default_lookahead_ms(),
            limiter_release_ms: default_release_ms(),
            gate_enabled: default_true(),
            gate_window_ms: default_gate_window_ms(),
            gate_threshold_db: default_gate_threshold_db(),
            gate_min_duration_ms: default_gate_min_duration_ms(),
            gate_depth_db: default_gate_depth_db(),
            gate_ramp_ms: default_gate_ramp_ms(),
        }
    }
}

/// Safety gate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Completed runs required before autonomy (default: 3)
    #[serde(default = "default_min_runs")]
    pub min_runs: usize,

    /// Aggregate failure rate above which autonomy is denied (default: 0.25)
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,

    /// Recent runs checked for alternating outcomes (default: 4)
    #[serde(default = "default_oscillation_window")]
    pub oscillation_window: usize,

    /// Recent runs compared against the older history (default: 2)
    #[serde(default = "default_recent_runs")]
    pub recent_runs: usize,

    /// Recent minus historical failure rate that counts as drift (default: 0.15)
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_runs: default_min_runs(),
            max_failure_rate: default_max_failure_rate(),
            oscillation_window: default_oscillation_window(),
            recent_runs: default_recent_runs(),
            drift_threshold: default_drift_threshold(),
        }
    }
}

/// Autonomous parameter tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Successful adjusted chunks needed per parameter (default: 3)
    #[serde(default = "default_tuner_min_samples")]
    pub min_samples: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_samples: default_tuner_min_samples(),
        }
    }
}

/// External transcription program (WAV on stdin, text on stdout)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriberConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Default: 120 s
    #[serde(default = "default_transcriber_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    4
}

fn default_chunk_timeout_ms() -> u64 {
    300_000
}

fn default_cpu_pressure_threshold() -> f64 {
    1.5
}

fn default_pressure_samples() -> u32 {
    3
}

fn default_sample_interval_ms() -> u64 {
    5000
}

fn default_attempts_per_engine() -> u32 {
    3
}

fn default_max_total_attempts() -> u32 {
    6
}

fn default_profile() -> ThresholdProfile {
    ThresholdProfile::Strict
}

fn default_sample_edge_count() -> usize {
    3
}

fn default_sample_fraction() -> f64 {
    0.1
}

fn default_phonemes_per_sec() -> f64 {
    12.5
}

fn default_comma_pause_secs() -> f64 {
    0.2
}

fn default_sentence_pause_secs() -> f64 {
    0.4
}

fn default_error_patterns() -> Vec<String> {
    [
        "traceback (most recent call last)",
        "runtimeerror",
        "cuda error",
        "out of memory",
        "failed to generate",
        "i'm sorry, i can't",
        "as an ai",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_target_lufs() -> f64 {
    -18.0
}

fn default_max_gain_db() -> f64 {
    24.0
}

fn default_true_peak_ceiling() -> f64 {
    -1.0
}

fn default_lookahead_ms() -> f64 {
    5.0
}

fn default_release_ms() -> f64 {
    80.0
}

fn default_gate_window_ms() -> f64 {
    20.0
}

fn default_gate_threshold_db() -> f64 {
    -50.0
}

fn default_gate_min_duration_ms() -> f64 {
    150.0
}

fn default_gate_depth_db() -> f64 {
    -12.0
}

fn default_gate_ramp_ms() -> f64 {
    5.0
}

fn default_min_runs() -> usize {
    3
}

fn default_max_failure_rate() -> f64 {
    0.25
}

fn default_oscillation_window() -> usize {
    4
}

fn default_recent_runs() -> usize {
    2
}

fn default_drift_threshold() -> f64 {
    0.15
}

fn default_tuner_min_samples() -> usize {
    3
}

fn default_transcriber_timeout_secs() -> u64 {
    120
}
