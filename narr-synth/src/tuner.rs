//! Autonomous parameter tuning
//!
//! Learns per-engine parameter defaults from chunks that needed an
//! adjustment to succeed: the median value they ended with becomes the
//! starting value for the next run. The safety gate decides whether those
//! learned values are used (autonomous mode) or ignored (supervised mode).

use std::collections::BTreeMap;
use std::fmt;

use narr_common::model::{ChunkStatus, RemediationAction, StateRecord};
use tracing::info;

use crate::config::{GateConfig, TunerConfig};
use crate::safety_gate::{GateDecision, SafetyGate};

/// engine id → parameter name → value
pub type TunedParameters = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningMode {
    Autonomous,
    Supervised,
}

impl fmt::Display for TuningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Autonomous => f.write_str("autonomous"),
            Self::Supervised => f.write_str("supervised"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TuningPlan {
    pub mode: TuningMode,
    pub decision: GateDecision,
    /// Empty in supervised mode
    pub parameters: TunedParameters,
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Median final value of each adjusted parameter, per engine
///
/// Only succeeded chunks whose retry history adjusted the parameter count,
/// and only parameters with at least `min_samples` such chunks are kept.
pub fn learn_parameters(record: &StateRecord, min_samples: usize) -> TunedParameters {
    let mut samples: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
    for chunk in record.chunks.values() {
        if chunk.status != ChunkStatus::Succeeded {
            continue;
        }
        let Some(engine) = &chunk.final_engine else {
            continue;
        };
        let mut adjusted: Vec<&str> = chunk
            .retry_history
            .iter()
            .filter_map(|r| match &r.action {
                RemediationAction::AdjustParameter { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        adjusted.sort_unstable();
        adjusted.dedup();
        for name in adjusted {
            if let Some(value) = chunk.final_parameters.get(name) {
                samples
                    .entry((engine.clone(), name.to_string()))
                    .or_default()
                    .push(*value);
            }
        }
    }

    let mut tuned = TunedParameters::new();
    for ((engine, name), mut values) in samples {
        if values.len() < min_samples.max(1) {
            continue;
        }
        if let Some(value) = median(&mut values) {
            tuned.entry(engine).or_default().insert(name, value);
        }
    }
    tuned
}

/// Decide the tuning mode for a run and the parameters it starts from
pub fn plan_run(record: &StateRecord, tuner: &TunerConfig, gate: &GateConfig) -> TuningPlan {
    let decision = SafetyGate::new(gate.clone()).evaluate(&record.metadata.runs);
    let learned = if tuner.enabled && decision.is_allowed() {
        learn_parameters(record, tuner.min_samples)
    } else {
        TunedParameters::new()
    };

    let mode = if learned.is_empty() {
        TuningMode::Supervised
    } else {
        TuningMode::Autonomous
    };
    match &decision {
        GateDecision::Allow => info!(
            mode = %mode,
            engines = learned.len(),
            "Safety gate allows autonomous tuning"
        ),
        GateDecision::Deny(reason) => info!(
            mode = %mode,
            reason = %reason,
            "Safety gate denied autonomous tuning, using configured parameters"
        ),
    }
    TuningPlan {
        mode,
        decision,
        parameters: learned,
    }
}
