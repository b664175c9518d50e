//! Uniform synthesis contract over a backend

use std::collections::BTreeMap;
use std::sync::Arc;

use super::profile::{EngineProfile, OversizePolicy};
use super::split::split_text;
use super::SynthesisBackend;
use crate::audio::AudioBuffer;
use crate::error::{EngineFailure, TransientKind};

/// Engine profile plus backend
pub struct EngineAdapter {
    profile: EngineProfile,
    backend: Arc<dyn SynthesisBackend>,
}

impl EngineAdapter {
    pub fn new(profile: EngineProfile, backend: Arc<dyn SynthesisBackend>) -> Self {
        Self { profile, backend }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    /// Profile defaults overlaid with `overrides` (generic names)
    pub fn effective_parameters(&self, overrides: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let mut merged = self.profile.parameters.clone();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        merged
    }

    /// Translate generic parameter names to the engine's native names
    ///
    /// Parameters the engine neither declares nor aliases are dropped.
    pub fn translate_parameters(&self, generic: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let mut native = BTreeMap::new();
        for (name, value) in generic {
            if let Some(alias) = self.profile.parameter_aliases.get(name) {
                native.insert(alias.clone(), *value);
            } else if self.profile.parameters.contains_key(name) {
                native.insert(name.clone(), *value);
            } else {
                tracing::debug!(engine = %self.profile.id, parameter = %name, "Dropping unsupported parameter");
            }
        }
        native
    }

    /// Synthesize `text` with `voice_id` (profile default when `None`)
    pub fn synthesize(
        &self,
        text: &str,
        voice_id: Option<&str>,
        parameters: &BTreeMap<String, f64>,
    ) -> Result<AudioBuffer, EngineFailure> {
        let voice = match voice_id {
            Some(v) if !self.profile.supports_voice(v) => {
                return Err(EngineFailure::permanent(format!(
                    "voice '{}' is not offered by engine {}",
                    v, self.profile.id
                )));
            }
            Some(v) => Some(v),
            None => self.profile.default_voice(),
        };

        if text.trim().is_empty() {
            return Err(EngineFailure::permanent("empty text"));
        }

        let native = self.translate_parameters(&self.effective_parameters(parameters));

        let length = text.chars().count();
        let parts = if length > self.profile.max_input_chars {
            match self.profile.oversize {
                OversizePolicy::Reject => {
                    return Err(EngineFailure::permanent(format!(
                        "text of {} chars exceeds engine {} limit of {}",
                        length, self.profile.id, self.profile.max_input_chars
                    )));
                }
                OversizePolicy::Split => {
                    let parts = split_text(text, self.profile.max_input_chars);
                    tracing::debug!(
                        engine = %self.profile.id,
                        chars = length,
                        parts = parts.len(),
                        "Splitting oversized text"
                    );
                    parts
                }
            }
        } else {
            vec![text.to_string()]
        };

        let pause_secs = self.profile.split_pause_ms as f64 / 1000.0;
        let mut combined = AudioBuffer::default();
        for part in &parts {
            let audio = self.backend.synthesize(part, voice, &native)?;
            combined.append(audio, pause_secs).map_err(|e| {
                EngineFailure::transient(TransientKind::Unavailable, e.to_string())
            })?;
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records calls; emits one second of low tone per call
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Option<String>, BTreeMap<String, f64>)>>,
    }

    impl SynthesisBackend for Recorder {
        fn synthesize(
            &self,
            text: &str,
            voice: Option<&str>,
            native: &BTreeMap<String, f64>,
        ) -> Result<AudioBuffer, EngineFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), voice.map(str::to_string), native.clone()));
            Ok(AudioBuffer::new(vec![0.1; 1000], 1000))
        }
    }

    fn profile() -> EngineProfile {
        let mut p = EngineProfile::new("bark");
        p.voices = vec!["narrator".into(), "alt".into()];
        p.max_input_chars = 20;
        p.parameters.insert("repetition_penalty".into(), 1.1);
        p.parameter_aliases.insert("repetition_penalty".into(), "rep_pen".into());
        p
    }

    #[test]
    fn test_parameters_are_translated_and_unknown_dropped() {
        let backend = Arc::new(Recorder::default());
        let adapter = EngineAdapter::new(profile(), backend.clone());

        let mut params = BTreeMap::new();
        params.insert("repetition_penalty".to_string(), 1.3);
        params.insert("temperature".to_string(), 0.7);
        adapter.synthesize("Short line.", None, &params).unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].1.as_deref(), Some("narrator"));
        assert_eq!(calls[0].2.get("rep_pen"), Some(&1.3));
        assert!(!calls[0].2.contains_key("temperature"));
    }

    #[test]
    fn test_unknown_voice_is_permanent() {
        let adapter = EngineAdapter::new(profile(), Arc::new(Recorder::default()));
        let err = adapter.synthesize("Hi.", Some("ghost"), &BTreeMap::new()).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_oversized_text_is_split_with_pause() {
        let backend = Arc::new(Recorder::default());
        let adapter = EngineAdapter::new(profile(), backend.clone());

        let audio = adapter
            .synthesize("First part here. Second part here.", None, &BTreeMap::new())
            .unwrap();

        assert_eq!(backend.calls.lock().unwrap().len(), 2);
        // 2 × 1 s + 250 ms pause
        assert!((audio.duration_secs() - 2.25).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_text_rejected_under_reject_policy() {
        let mut p = profile();
        p.oversize = OversizePolicy::Reject;
        let backend = Arc::new(Recorder::default());
        let adapter = EngineAdapter::new(p, backend.clone());

        let err = adapter
            .synthesize("This sentence is clearly longer than twenty.", None, &BTreeMap::new())
            .unwrap_err();

        assert!(!err.is_transient());
        assert!(backend.calls.lock().unwrap().is_empty());
    }
}
