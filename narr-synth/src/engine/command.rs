//! Backend that runs an external synthesis program
//!
//! Contract with the program: text arrives on stdin, a WAV file is expected
//! on stdout, and stderr lines are kept as diagnostic notes. Arguments may
//! contain `{voice}` and `{<native parameter>}` placeholders.

use std::collections::BTreeMap;
use std::time::Duration;

use super::profile::CommandSpec;
use super::SynthesisBackend;
use crate::audio::AudioBuffer;
use crate::error::{EngineFailure, TransientKind};
use crate::process::{run_piped, ProcessError};

/// stderr fragments that indicate the engine ran out of something
const RESOURCE_MARKERS: &[&str] = &[
    "out of memory",
    "cuda error",
    "oom",
    "resource exhausted",
    "cannot allocate",
    "device busy",
];

pub struct CommandBackend {
    spec: CommandSpec,
    /// Hard limit after which the child is killed
    timeout: Option<Duration>,
}

impl CommandBackend {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Arguments with placeholders substituted
    pub fn render_args(&self, voice: Option<&str>, params: &BTreeMap<String, f64>) -> Vec<String> {
        self.spec
            .args
            .iter()
            .map(|arg| {
                let mut out = arg.replace("{voice}", voice.unwrap_or(""));
                for (name, value) in params {
                    out = out.replace(&format!("{{{}}}", name), &value.to_string());
                }
                out
            })
            .collect()
    }
}

impl SynthesisBackend for CommandBackend {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        native_parameters: &BTreeMap<String, f64>,
    ) -> Result<AudioBuffer, EngineFailure> {
        let args = self.render_args(voice, native_parameters);
        let program = &self.spec.program;
        let output = run_piped(program, &args, text.as_bytes().to_vec(), self.timeout)
            .map_err(|e| match e {
                ProcessError::Spawn { .. } => EngineFailure::permanent(e.to_string()),
                ProcessError::TimedOut { .. } => {
                    EngineFailure::transient(TransientKind::Timeout, e.to_string())
                }
                ProcessError::Wait { .. } => {
                    EngineFailure::transient(TransientKind::Unavailable, e.to_string())
                }
            })?;

        if !output.status.success() {
            let lower = output.stderr.to_lowercase();
            let kind = if RESOURCE_MARKERS.iter().any(|m| lower.contains(m)) {
                TransientKind::ResourceExhausted
            } else {
                TransientKind::Unavailable
            };
            return Err(EngineFailure::transient(
                kind,
                format!("{} exited with {}: {}", program, output.status, output.stderr.trim()),
            ));
        }

        let mut audio = AudioBuffer::from_wav_bytes(&output.stdout).map_err(|e| {
            EngineFailure::transient(
                TransientKind::Unavailable,
                format!("unreadable audio from {}: {}", program, e),
            )
        })?;
        audio.notes = output
            .stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(audio)
    }
}
