//! Engine id → adapter lookup

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::adapter::EngineAdapter;
use super::command::CommandBackend;
use super::profile::EngineProfile;
use super::SynthesisBackend;
use crate::error::{SynthError, SynthResult};

#[derive(Default, Clone)]
pub struct EngineRegistry {
    adapters: BTreeMap<String, Arc<EngineAdapter>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every profile that declares a command
    ///
    /// Profiles without a command are skipped with a warning; they can still
    /// be registered programmatically with [`EngineRegistry::register`].
    pub fn from_profiles(profiles: &[EngineProfile], process_timeout: Duration) -> Self {
        let mut registry = Self::new();
        for profile in profiles {
            match &profile.command {
                Some(spec) => {
                    let backend = CommandBackend::new(spec.clone()).with_timeout(process_timeout);
                    registry.register(profile.clone(), Arc::new(backend));
                }
                None => {
                    tracing::warn!(engine = %profile.id, "Engine has no command configured, not registered")
                }
            }
        }
        registry
    }

    pub fn register(&mut self, profile: EngineProfile, backend: Arc<dyn SynthesisBackend>) {
        let id = profile.id.clone();
        if self
            .adapters
            .insert(id.clone(), Arc::new(EngineAdapter::new(profile, backend)))
            .is_some()
        {
            tracing::warn!(engine = %id, "Replacing registered engine");
        }
    }

    pub fn get(&self, id: &str) -> SynthResult<Arc<EngineAdapter>> {
        self.adapters
            .get(id)
            .cloned()
            .ok_or_else(|| SynthError::UnknownEngine(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    /// Registered fallback of `id`, if it has one
    pub fn fallback_for(&self, id: &str) -> Option<Arc<EngineAdapter>> {
        let fallback = self.adapters.get(id)?.profile().fallback.as_deref()?;
        self.adapters.get(fallback).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Concurrency cost of `id` (1.0 for an unknown engine)
    pub fn concurrency_cost(&self, id: &str) -> f64 {
        self.adapters
            .get(id)
            .map(|a| a.profile().concurrency_cost)
            .unwrap_or(1.0)
    }
}
