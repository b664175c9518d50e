//! Speech-to-text backends for transcript validation

use std::time::Duration;

use crate::audio::AudioBuffer;
use crate::config::TranscriberConfig;
use crate::error::TranscriptionError;
use crate::process::run_piped;

/// Speech-to-text backend
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &AudioBuffer) -> Result<String, TranscriptionError>;
}

/// Transcriber that runs an external program: WAV on stdin, text on stdout
pub struct CommandTranscriber {
    config: TranscriberConfig,
}

impl CommandTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&self, audio: &AudioBuffer) -> Result<String, TranscriptionError> {
        let wav = audio
            .to_wav_bytes()
            .map_err(|e| TranscriptionError::BadOutput(format!("cannot encode audio: {}", e)))?;
        let output = run_piped(
            &self.config.program,
            &self.config.args,
            wav,
            Some(Duration::from_secs(self.config.timeout_secs)),
        )
        .map_err(|e| TranscriptionError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(TranscriptionError::Unavailable(format!(
                "{} exited with {}: {}",
                self.config.program,
                output.status,
                output.stderr.trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_string())
            .map_err(|e| TranscriptionError::BadOutput(e.to_string()))
    }
}
