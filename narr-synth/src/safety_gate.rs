//! Safety gate for autonomous parameter tuning
//!
//! The gate only decides whether tuned defaults may replace configured ones
//! for the next run. Per-chunk remediation always runs regardless.

use std::fmt;

use narr_common::model::RunSummary;
use serde::{Deserialize, Serialize};

use crate::config::GateConfig;

/// Why autonomy was denied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    InsufficientHistory { runs: usize, required: usize },
    FailureRateExceeded { rate: f64, max: f64 },
    /// Recent runs alternate between clean and failing
    OscillatingOutcomes { window: usize },
    PerformanceDrift { recent: f64, historical: f64, threshold: f64 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientHistory { runs, required } => {
                write!(f, "insufficient_history ({} of {} runs)", runs, required)
            }
            Self::FailureRateExceeded { rate, max } => {
                write!(f, "failure_rate_exceeded ({:.3} > {:.3})", rate, max)
            }
            Self::OscillatingOutcomes { window } => {
                write!(f, "oscillating_outcomes (last {} runs alternate)", window)
            }
            Self::PerformanceDrift {
                recent,
                historical,
                threshold,
            } => write!(
                f,
                "performance_drift (recent {:.3} vs historical {:.3}, threshold {:.3})",
                recent, historical, threshold
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

pub struct SafetyGate {
    config: GateConfig,
}

impl SafetyGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Decide from run history (oldest first)
    ///
    /// Runs that processed nothing carry no signal and are ignored. Checks
    /// run in order: history length, aggregate failure rate, oscillation,
    /// drift.
    pub fn evaluate(&self, runs: &[RunSummary]) -> GateDecision {
        let runs: Vec<&RunSummary> = runs.iter().filter(|r| r.chunks_processed > 0).collect();
        let c = &self.config;

        if runs.len() < c.min_runs.max(1) {
            return GateDecision::Deny(DenyReason::InsufficientHistory {
                runs: runs.len(),
                required: c.min_runs.max(1),
            });
        }

        let processed: usize = runs.iter().map(|r| r.chunks_processed).sum();
        let failed: usize = runs.iter().map(|r| r.failed).sum();
        let rate = failed as f64 / processed as f64;
        if rate > c.max_failure_rate {
            return GateDecision::Deny(DenyReason::FailureRateExceeded {
                rate,
                max: c.max_failure_rate,
            });
        }

        if c.oscillation_window >= 2 && runs.len() >= c.oscillation_window {
            let recent = &runs[runs.len() - c.oscillation_window..];
            let clean: Vec<bool> = recent.iter().map(|r| r.failed == 0).collect();
            if clean.windows(2).all(|pair| pair[0] != pair[1]) {
                return GateDecision::Deny(DenyReason::OscillatingOutcomes {
                    window: c.oscillation_window,
                });
            }
        }

        if c.recent_runs > 0 && runs.len() > c.recent_runs {
            let split = runs.len() - c.recent_runs;
            let mean = |slice: &[&RunSummary]| {
                slice.iter().map(|r| r.failure_rate()).sum::<f64>() / slice.len() as f64
            };
            let historical = mean(&runs[..split]);
            let recent = mean(&runs[split..]);
            if recent - historical > c.drift_threshold {
                return GateDecision::Deny(DenyReason::PerformanceDrift {
                    recent,
                    historical,
                    threshold: c.drift_threshold,
                });
            }
        }

        GateDecision::Allow
    }
}
