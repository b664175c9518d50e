//! Engine profiles as declared in `[[engines]]`

use narr_common::model::RemediationTrigger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to do with text longer than an engine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Split on sentence, then word boundaries; parts are joined with a pause
    Split,
    /// Fail the chunk with a permanent engine failure
    Reject,
}

/// External program for the command backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    /// Arguments; `{voice}` and `{<native parameter>}` are substituted
    #[serde(default)]
    pub args: Vec<String>,
}

/// Remediation action template, instantiated by the retry planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    /// Move a generic parameter by `step`, bounded to `[min, max]`
    AdjustParameter {
        name: String,
        step: f64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Use the next voice in the profile's voice list
    RotateVoice,
    /// Move to the profile's fallback engine
    SwitchEngine,
}

/// One entry of an engine's remediation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRule {
    pub trigger: RemediationTrigger,
    pub action: RuleAction,
}

/// Static description of an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineProfile {
    pub id: String,

    /// Built-in voice ids; the first one is the default
    #[serde(default)]
    pub voices: Vec<String>,

    /// Share of one CPU a single synthesis occupies (default: 1.0)
    #[serde(default = "default_concurrency_cost")]
    pub concurrency_cost: f64,

    /// Longest text accepted in one call, in characters (default: 600)
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_oversize")]
    pub oversize: OversizePolicy,

    /// Pause inserted between split parts (default: 250 ms)
    #[serde(default = "default_split_pause_ms")]
    pub split_pause_ms: u64,

    /// Generic parameter defaults
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,

    /// Generic parameter name → engine-native argument name
    #[serde(default)]
    pub parameter_aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub remediation: Vec<RemediationRule>,

    /// Engine to switch to after this one exhausts its attempts
    #[serde(default)]
    pub fallback: Option<String>,

    #[serde(default)]
    pub command: Option<CommandSpec>,
}

impl EngineProfile {
    /// Minimal profile; used by tests and programmatic registration
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            voices: Vec::new(),
            concurrency_cost: default_concurrency_cost(),
            max_input_chars: default_max_input_chars(),
            oversize: default_oversize(),
            split_pause_ms: default_split_pause_ms(),
            parameters: BTreeMap::new(),
            parameter_aliases: BTreeMap::new(),
            remediation: Vec::new(),
            fallback: None,
            command: None,
        }
    }

    pub fn default_voice(&self) -> Option<&str> {
        self.voices.first().map(String::as_str)
    }

    pub fn supports_voice(&self, voice: &str) -> bool {
        self.voices.is_empty() || self.voices.iter().any(|v| v == voice)
    }

    /// Rules keyed on `trigger`, in declaration order
    pub fn rules_for(&self, trigger: RemediationTrigger) -> impl Iterator<Item = &RemediationRule> {
        self.remediation.iter().filter(move |r| r.trigger == trigger)
    }

    /// Voice following `current` in the rotation, wrapping around
    pub fn next_voice(&self, current: Option<&str>) -> Option<&str> {
        if self.voices.len() < 2 {
            return None;
        }
        let idx = current
            .and_then(|c| self.voices.iter().position(|v| v == c))
            .unwrap_or(0);
        self.voices.get((idx + 1) % self.voices.len()).map(String::as_str)
    }
}

fn default_concurrency_cost() -> f64 {
    1.0
}

fn default_max_input_chars() -> usize {
    600
}

fn default_oversize() -> OversizePolicy {
    OversizePolicy::Split
}

fn default_split_pause_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_toml() {
        let toml_str = r#"
            id = "bark"
            voices = ["v2/en_speaker_1", "v2/en_speaker_6"]
            concurrency_cost = 2.0
            fallback = "kokoro"

            [parameters]
            repetition_penalty = 1.1

            [parameter_aliases]
            repetition_penalty = "rep_pen"

            [[remediation]]
            trigger = "duration_too_long"
            action = { kind = "adjust_parameter", name = "repetition_penalty", step = 0.1, max = 1.6 }

            [[remediation]]
            trigger = "silence_gap"
            action = { kind = "rotate_voice" }
        "#;

        let profile: EngineProfile = toml::from_str(toml_str).unwrap();

        assert_eq!(profile.max_input_chars, 600);
        assert_eq!(profile.oversize, OversizePolicy::Split);
        assert_eq!(profile.remediation.len(), 2);
        assert!(matches!(
            profile.rules_for(RemediationTrigger::DurationTooLong).next().map(|r| &r.action),
            Some(RuleAction::AdjustParameter { step, max: Some(_), min: None, .. }) if *step == 0.1
        ));
        assert_eq!(profile.default_voice(), Some("v2/en_speaker_1"));
    }

    #[test]
    fn test_next_voice_wraps() {
        let mut profile = EngineProfile::new("x");
        assert_eq!(profile.next_voice(None), None);

        profile.voices = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(profile.next_voice(None), Some("b"));
        assert_eq!(profile.next_voice(Some("b")), Some("c"));
        assert_eq!(profile.next_voice(Some("c")), Some("a"));
        assert_eq!(profile.next_voice(Some("unknown")), Some("b"));
    }
}
