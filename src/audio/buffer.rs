//! Decoded audio for one utterance.

use crate::error::{Result, TtsError};
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::time::Duration;

/// Interleaved 16-bit PCM samples with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Creates a mono buffer.
    pub fn mono(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Zero-length marker substituted for a failed utterance.
    pub fn silent_marker(sample_rate: u32) -> Self {
        Self::mono(Vec::new(), sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64)
    }

    /// Decode WAV data. Float and wider integer formats are converted to 16-bit.
    pub fn from_wav_reader<R: Read>(reader: R) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| TtsError::AudioFormat {
            message: format!("Failed to parse WAV data: {}", e),
        })?;
        let spec = wav_reader.spec();

        let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => wav_reader
                .samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            (hound::SampleFormat::Int, bits) => {
                let shift = bits.saturating_sub(16) as u32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
            (hound::SampleFormat::Float, _) => wav_reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<std::result::Result<Vec<_>, _>>(),
        }
        .map_err(|e| TtsError::AudioFormat {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }

    /// Decode a WAV file.
    pub fn from_wav_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_wav_reader(std::io::BufReader::new(file))
    }

    /// Encode as 16-bit PCM WAV.
    pub fn write_wav<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.channels.max(1),
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let wav_err = |e: hound::Error| TtsError::AudioFormat {
            message: format!("Failed to write WAV data: {}", e),
        };
        let mut wav_writer = hound::WavWriter::new(writer, spec).map_err(wav_err)?;
        for &sample in &self.samples {
            wav_writer.write_sample(sample).map_err(wav_err)?;
        }
        wav_writer.finalize().map_err(wav_err)
    }

    /// Write a WAV file at `path`.
    pub fn write_wav_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_wav(std::io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_silent_marker_is_empty() {
        let marker = AudioBuffer::silent_marker(22050);
        assert!(marker.is_empty());
        assert_eq!(marker.duration(), Duration::ZERO);
    }

    #[test]
    fn test_duration_counts_frames() {
        let mono = AudioBuffer::mono(vec![0; 22050], 22050);
        assert_eq!(mono.duration(), Duration::from_secs(1));

        let stereo = AudioBuffer {
            samples: vec![0; 44100],
            sample_rate: 22050,
            channels: 2,
        };
        assert_eq!(stereo.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_wav_write_then_read_preserves_samples() {
        let original = AudioBuffer::mono(vec![0, 1000, -1000, i16::MAX, i16::MIN], 22050);

        let mut cursor = Cursor::new(Vec::new());
        original.write_wav(&mut cursor).unwrap();
        cursor.set_position(0);

        let decoded = AudioBuffer::from_wav_reader(cursor).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_float_wav_converted_to_i16() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(0.0f32).unwrap();
            writer.write_sample(1.0f32).unwrap();
            writer.write_sample(-2.0f32).unwrap();
            writer.finalize().unwrap();
        }
        cursor.set_position(0);

        let decoded = AudioBuffer::from_wav_reader(cursor).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples, vec![0, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_invalid_wav_rejected() {
        let result = AudioBuffer::from_wav_reader(Cursor::new(b"not a wav".to_vec()));
        assert!(matches!(result, Err(TtsError::AudioFormat { .. })));
    }

    #[test]
    fn test_wav_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("utt.wav");
        let buffer = AudioBuffer::mono(vec![5; 100], 22050);

        buffer.write_wav_file(&path).unwrap();
        assert_eq!(AudioBuffer::from_wav_file(&path).unwrap(), buffer);
    }
}
