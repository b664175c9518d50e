//! Remediation decisions between attempts

use std::collections::BTreeMap;

use narr_common::model::{RemediationAction, RemediationTrigger};
use tracing::debug;

use crate::config::RetryConfig;
use crate::engine::{EngineProfile, EngineRegistry, RuleAction};
use crate::error::SynthResult;

/// Engine, voice, and generic parameter bag for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptPlan {
    pub engine: String,
    pub voice: Option<String>,
    /// Full generic parameter bag (profile defaults already applied)
    pub parameters: BTreeMap<String, f64>,
}

/// Attempt counters the planner needs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptTally {
    /// Attempts since the last reset
    pub total: u32,
    /// Attempts on the current engine
    pub on_engine: u32,
    /// Engines already tried, in order
    pub engines_used: Vec<String>,
}

impl AttemptTally {
    pub fn record(&mut self, engine: &str) {
        self.total += 1;
        if self.engines_used.last().map(String::as_str) == Some(engine) {
            self.on_engine += 1;
        } else {
            self.on_engine = 1;
            if !self.engines_used.iter().any(|e| e == engine) {
                self.engines_used.push(engine.to_string());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry {
        plan: AttemptPlan,
        action: RemediationAction,
    },
    GiveUp {
        reason: String,
    },
}

/// Picks the next attempt after a failure
///
/// Order of precedence:
/// 1. Hard cap on total attempts: give up
/// 2. Per-engine cap: switch to the fallback engine, or give up when there
///    is none left to try
/// 3. First applicable rule of the engine's remediation table
/// 4. Retry unchanged
pub struct RetryPlanner<'a> {
    registry: &'a EngineRegistry,
    caps: &'a RetryConfig,
}

impl<'a> RetryPlanner<'a> {
    pub fn new(registry: &'a EngineRegistry, caps: &'a RetryConfig) -> Self {
        Self { registry, caps }
    }

    /// First attempt for a chunk
    ///
    /// `tuned` replaces profile defaults for parameters the profile declares.
    pub fn initial_plan(
        &self,
        engine: &str,
        voice: Option<&str>,
        tuned: &BTreeMap<String, f64>,
    ) -> SynthResult<AttemptPlan> {
        let adapter = self.registry.get(engine)?;
        let mut parameters = adapter.profile().parameters.clone();
        for (name, value) in tuned {
            if let Some(slot) = parameters.get_mut(name) {
                *slot = *value;
            }
        }
        Ok(AttemptPlan {
            engine: engine.to_string(),
            voice: voice.map(str::to_string),
            parameters,
        })
    }

    pub fn decide(
        &self,
        current: &AttemptPlan,
        trigger: RemediationTrigger,
        tally: &AttemptTally,
    ) -> RetryDecision {
        if tally.total >= self.caps.max_total_attempts {
            return RetryDecision::GiveUp {
                reason: format!("attempt cap of {} reached", self.caps.max_total_attempts),
            };
        }

        let profile = match self.registry.get(&current.engine) {
            Ok(adapter) => adapter.profile().clone(),
            Err(e) => {
                return RetryDecision::GiveUp {
                    reason: e.to_string(),
                }
            }
        };

        if tally.on_engine >= self.caps.attempts_per_engine {
            return match self.switch_engine(current, &profile, tally) {
                Some(decision) => decision,
                None => RetryDecision::GiveUp {
                    reason: format!(
                        "engine {} used {} attempts and no untried fallback remains",
                        current.engine, tally.on_engine
                    ),
                },
            };
        }

        for rule in profile.rules_for(trigger) {
            let decision = match &rule.action {
                RuleAction::AdjustParameter { name, step, min, max } => {
                    adjust(current, name, *step, *min, *max)
                }
                RuleAction::RotateVoice => rotate_voice(current, &profile),
                RuleAction::SwitchEngine => self.switch_engine(current, &profile, tally),
            };
            if let Some(decision) = decision {
                return decision;
            }
            debug!(engine = %current.engine, %trigger, "Remediation rule not applicable, trying next");
        }

        RetryDecision::Retry {
            plan: current.clone(),
            action: RemediationAction::RetryUnchanged,
        }
    }

    fn switch_engine(
        &self,
        current: &AttemptPlan,
        profile: &EngineProfile,
        tally: &AttemptTally,
    ) -> Option<RetryDecision> {
        let fallback = profile.fallback.as_deref()?;
        if tally.engines_used.iter().any(|e| e == fallback) {
            return None;
        }
        let adapter = self.registry.fallback_for(&current.engine)?;
        let next = adapter.profile();
        // Keep the requested voice only if the new engine offers it
        let voice = current
            .voice
            .as_deref()
            .filter(|v| !next.voices.is_empty() && next.supports_voice(v))
            .map(str::to_string);
        Some(RetryDecision::Retry {
            plan: AttemptPlan {
                engine: next.id.clone(),
                voice,
                parameters: next.parameters.clone(),
            },
            action: RemediationAction::SwitchEngine {
                from: current.engine.clone(),
                to: next.id.clone(),
            },
        })
    }
}

fn adjust(
    current: &AttemptPlan,
    name: &str,
    step: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Option<RetryDecision> {
    let from = *current.parameters.get(name)?;
    let mut to = from + step;
    if let Some(min) = min {
        to = to.max(min);
    }
    if let Some(max) = max {
        to = to.min(max);
    }
    if (to - from).abs() < f64::EPSILON {
        // Already at the bound
        return None;
    }
    let mut plan = current.clone();
    plan.parameters.insert(name.to_string(), to);
    Some(RetryDecision::Retry {
        plan,
        action: RemediationAction::AdjustParameter {
            name: name.to_string(),
            from,
            to,
        },
    })
}

fn rotate_voice(current: &AttemptPlan, profile: &EngineProfile) -> Option<RetryDecision> {
    let from = current.voice.as_deref().or_else(|| profile.default_voice());
    let to = profile.next_voice(from)?.to_string();
    let mut plan = current.clone();
    plan.voice = Some(to.clone());
    Some(RetryDecision::Retry {
        plan,
        action: RemediationAction::RotateVoice {
            from: current.voice.clone(),
            to,
        },
    })
}
