//! Mono PCM buffers, level helpers, and WAV I/O

use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use crate::error::{SynthError, SynthResult};

/// Measurement floor for levels of silent audio (dBFS / LUFS)
///
/// Silence would otherwise measure `-inf`, which cannot be persisted.
pub const LEVEL_FLOOR_DB: f64 = -120.0;

/// Mono audio as produced by an engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Engine diagnostic lines (stderr, warnings) captured with the audio
    pub notes: Vec<String>,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            notes: Vec::new(),
        }
    }

    pub fn silence(duration_secs: f64, sample_rate: u32) -> Self {
        let n = (duration_secs * f64::from(sample_rate)).round() as usize;
        Self::new(vec![0.0; n], sample_rate)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample peak in dBFS, floored
    pub fn peak_dbfs(&self) -> f64 {
        let peak = self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        linear_to_db(f64::from(peak))
    }

    /// Append `other` after `gap_secs` of silence
    ///
    /// Sample rates must match; split parts always come from one engine.
    pub fn append(&mut self, other: AudioBuffer, gap_secs: f64) -> SynthResult<()> {
        if self.samples.is_empty() && self.notes.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.sample_rate != self.sample_rate {
            return Err(SynthError::Audio(format!(
                "cannot join {} Hz audio onto {} Hz audio",
                other.sample_rate, self.sample_rate
            )));
        }
        let gap = (gap_secs * f64::from(self.sample_rate)).round() as usize;
        self.samples.extend(std::iter::repeat(0.0).take(gap));
        self.samples.extend(other.samples);
        self.notes.extend(other.notes);
        Ok(())
    }

    /// Decode a WAV stream, downmixing to mono
    pub fn read_wav<R: Read>(reader: R) -> SynthResult<Self> {
        let mut wav = hound::WavReader::new(reader)?;
        let spec = wav.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                wav.samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(Self::new(samples, spec.sample_rate))
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> SynthResult<Self> {
        Self::read_wav(Cursor::new(bytes))
    }

    pub fn read_wav_file(path: &Path) -> SynthResult<Self> {
        Self::read_wav(std::io::BufReader::new(fs::File::open(path)?))
    }

    /// Encode as 16-bit PCM mono
    pub fn write_wav<W: std::io::Write + Seek>(&self, writer: W) -> SynthResult<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut wav = hound::WavWriter::new(writer, spec)?;
        for &s in &self.samples {
            let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            wav.write_sample(v)?;
        }
        wav.finalize()?;
        Ok(())
    }

    pub fn to_wav_bytes(&self) -> SynthResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_wav(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Write to `path` via a temp file and rename
    pub fn write_wav_atomic(&self, path: &Path) -> SynthResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("wav.tmp");
        let bytes = self.to_wav_bytes()?;
        {
            use std::io::Write;
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Linear amplitude to dB, floored at [`LEVEL_FLOOR_DB`]
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 {
        return LEVEL_FLOOR_DB;
    }
    (20.0 * linear.log10()).max(LEVEL_FLOOR_DB)
}

/// RMS of a window
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Window length in samples for `ms` milliseconds, at least one sample
pub fn window_samples(sample_rate: u32, ms: f64) -> usize {
    ((f64::from(sample_rate) * ms / 1000.0).round() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(secs: f64, amp: f32, rate: u32) -> AudioBuffer {
        let n = (secs * f64::from(rate)) as usize;
        let samples = (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect();
        AudioBuffer::new(samples, rate)
    }

    #[test]
    fn test_silence_levels_are_floored() {
        let silent = AudioBuffer::silence(1.0, 16_000);
        assert_eq!(silent.peak_dbfs(), LEVEL_FLOOR_DB);
        assert_eq!(linear_to_db(0.0), LEVEL_FLOOR_DB);
        assert!(silent.peak_dbfs().is_finite());
    }

    #[test]
    fn test_wav_roundtrip_keeps_length_and_rate() {
        let buffer = tone(0.5, 0.5, 22_050);
        let bytes = buffer.to_wav_bytes().unwrap();
        let back = AudioBuffer::from_wav_bytes(&bytes).unwrap();

        assert_eq!(back.sample_rate, 22_050);
        assert_eq!(back.samples.len(), buffer.samples.len());
        assert!((back.peak_dbfs() - buffer.peak_dbfs()).abs() < 0.01);
    }

    #[test]
    fn test_append_inserts_gap() {
        let mut a = tone(1.0, 0.3, 8_000);
        a.append(tone(1.0, 0.3, 8_000), 0.25).unwrap();
        assert!((a.duration_secs() - 2.25).abs() < 1e-9);

        let mut b = tone(1.0, 0.3, 8_000);
        assert!(b.append(tone(1.0, 0.3, 16_000), 0.0).is_err());
    }

    #[test]
    fn test_db_conversions() {
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-4);
        assert!((linear_to_db(1.0)).abs() < 1e-12);
        assert_eq!(window_samples(48_000, 20.0), 960);
    }
}
