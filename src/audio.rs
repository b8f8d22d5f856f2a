//! Audio ingestion and PCM conversion.
//!
//! The core treats audio as an immutable mono float32 buffer at 22050 Hz,
//! normalized once at ingestion time. The muxer reads a 16-bit little-endian
//! PCM rendition of it; the samples themselves are never mutated after load.

use std::{path::Path, sync::Arc};

use anyhow::Context as _;

use crate::error::{VisemixError, VisemixResult};

/// Required input sample rate.
pub const SAMPLE_RATE: u32 = 22_050;

/// Immutable mono float32 audio.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> VisemixResult<Self> {
        if sample_rate == 0 {
            return Err(VisemixError::validation("sample rate must be > 0"));
        }
        Ok(Self {
            samples: Arc::new(samples),
            sample_rate,
        })
    }

    /// Ingest a mono WAV file.
    ///
    /// Accepts IEEE float32 or 16-bit integer PCM payloads; anything else is
    /// an input-contract violation. Samples are peak-normalized on load.
    pub fn from_wav_path(path: &Path) -> VisemixResult<Self> {
        let reader = hound::WavReader::open(path)
            .with_context(|| format!("failed to open WAV '{}'", path.display()))?;
        let spec = reader.spec();

        if spec.channels != 1 {
            return Err(VisemixError::validation(format!(
                "WAV '{}' has {} channels, expected mono",
                path.display(),
                spec.channels
            )));
        }
        if spec.sample_rate != SAMPLE_RATE {
            return Err(VisemixError::validation(format!(
                "WAV '{}' is {} Hz, expected {SAMPLE_RATE} Hz",
                path.display(),
                spec.sample_rate
            )));
        }

        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .context("failed to read float32 WAV samples")?,
            (hound::SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / 32_768.0))
                .collect::<Result<_, _>>()
                .context("failed to read int16 WAV samples")?,
            (format, bits) => {
                return Err(VisemixError::validation(format!(
                    "WAV '{}' has unsupported format {format:?}/{bits}-bit \
                     (expected float32 or int16)",
                    path.display()
                )));
            }
        };

        Self::new(normalize_peak(samples), SAMPLE_RATE)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Convert to 16-bit little-endian PCM, clamping to `[-1, 1]`.
    pub fn to_s16le(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for &s in self.samples.iter() {
            let v = (s.clamp(-1.0, 1.0) * 32_767.0) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Scale so the loudest sample sits at 1.0. Silence stays silent.
fn normalize_peak(mut samples: Vec<f32>) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 && peak.is_finite() {
        for s in &mut samples {
            *s /= peak;
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_sample_count() {
        let audio = AudioBuffer::new(vec![0.0; 22_050], SAMPLE_RATE).unwrap();
        assert_eq!(audio.duration_secs(), 1.0);
    }

    #[test]
    fn s16le_conversion_clamps_and_scales() {
        let audio = AudioBuffer::new(vec![0.0, 1.0, -1.0, 2.0], SAMPLE_RATE).unwrap();
        let pcm = audio.to_s16le();
        assert_eq!(pcm.len(), 8);
        assert_eq!(&pcm[0..2], &0i16.to_le_bytes());
        assert_eq!(&pcm[2..4], &32_767i16.to_le_bytes());
        assert_eq!(&pcm[4..6], &(-32_767i16).to_le_bytes());
        // Out-of-range input clamps instead of wrapping.
        assert_eq!(&pcm[6..8], &32_767i16.to_le_bytes());
    }

    #[test]
    fn peak_normalization_scales_to_unity() {
        let samples = normalize_peak(vec![0.25, -0.5]);
        assert_eq!(samples, vec![0.5, -1.0]);
        // All-zero input is left untouched.
        assert_eq!(normalize_peak(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn wav_round_trip_float32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..2205 {
            let t = i as f32 / SAMPLE_RATE as f32;
            writer
                .write_sample(0.5 * (t * 440.0 * std::f32::consts::TAU).sin())
                .unwrap();
        }
        writer.finalize().unwrap();

        let audio = AudioBuffer::from_wav_path(&path).unwrap();
        assert_eq!(audio.sample_rate(), SAMPLE_RATE);
        assert_eq!(audio.samples().len(), 2205);
        // Normalized: peak is 1.0.
        let peak = audio.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wav_rejects_stereo_and_wrong_rate() {
        let dir = tempfile::tempdir().unwrap();

        let stereo = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&stereo, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();
        assert!(AudioBuffer::from_wav_path(&stereo).is_err());

        let wrong_rate = dir.path().join("rate.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wrong_rate, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();
        assert!(AudioBuffer::from_wav_path(&wrong_rate).is_err());
    }
}
