//! Scripted synthesis and transcription backends

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use narr_synth::engine::SynthesisBackend;
use narr_synth::error::TranscriptionError;
use narr_synth::validation::Transcriber;
use narr_synth::{AudioBuffer, EngineFailure};

/// One synthesis request as the backend received it
#[derive(Debug, Clone)]
pub struct Call {
    pub text: String,
    pub voice: Option<String>,
    pub parameters: BTreeMap<String, f64>,
}

impl Call {
    pub fn param(&self, name: &str) -> f64 {
        self.parameters.get(name).copied().unwrap_or_default()
    }
}

type Script = dyn Fn(&Call, usize) -> Result<AudioBuffer, EngineFailure> + Send + Sync;

/// Backend whose output is decided by a closure
///
/// The closure receives the call and how many earlier calls carried the same
/// text, so per-chunk behaviour can change between attempts.
pub struct ScriptedEngine {
    script: Box<Script>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedEngine {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Call, usize) -> Result<AudioBuffer, EngineFailure> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Backend that always returns audio of the expected length
    pub fn clean() -> Self {
        Self::new(|call, _| Ok(super::narration_for(&call.text, 1.0)))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose text contains `needle`
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.text.contains(needle))
            .count()
    }
}

impl SynthesisBackend for ScriptedEngine {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        native_parameters: &BTreeMap<String, f64>,
    ) -> Result<AudioBuffer, EngineFailure> {
        let call = Call {
            text: text.to_string(),
            voice: voice.map(str::to_string),
            parameters: native_parameters.clone(),
        };
        let earlier = {
            let mut calls = self.calls.lock().unwrap();
            let earlier = calls.iter().filter(|c| c.text == text).count();
            calls.push(call.clone());
            earlier
        };
        // Lock released: scripts may sleep
        (self.script)(&call, earlier)
    }
}

/// Transcriber returning queued transcripts, then repeating the last one
pub struct QueuedTranscriber {
    queue: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl QueuedTranscriber {
    pub fn new(transcripts: &[&str]) -> Self {
        Self {
            queue: Mutex::new(transcripts.iter().map(|t| t.to_string()).collect()),
            last: Mutex::new(String::new()),
        }
    }
}

impl Transcriber for QueuedTranscriber {
    fn transcribe(&self, _audio: &AudioBuffer) -> Result<String, TranscriptionError> {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}
