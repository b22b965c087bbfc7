//! Decoding of synthesized voice bytes into playable buffers.

use std::io::Cursor;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};

/// A finite mono buffer at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl VoiceBuffer {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Silence of the given length.
pub fn silent_buffer(seconds: f64, sample_rate: u32) -> VoiceBuffer {
    let len = (seconds * sample_rate as f64).round() as usize;
    VoiceBuffer {
        samples: vec![0.0; len],
        sample_rate,
    }
}

/// A trait for decoders that turn opaque voice bytes into a mono buffer at
/// the context sample rate.
pub trait VoiceDecoder: Send + Sync {
    fn decode(&self, data: &[u8], target_rate: u32) -> Result<VoiceBuffer>;
}

/// RIFF/WAVE decoder (integer or float PCM, any channel count).
pub struct WavDecoder;

impl VoiceDecoder for WavDecoder {
    fn decode(&self, data: &[u8], target_rate: u32) -> Result<VoiceBuffer> {
        let mut reader =
            WavReader::new(Cursor::new(data)).with_context(|| "Failed to read WAV header")?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .with_context(|| "Failed to read float samples")?,
            SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .with_context(|| "Failed to read integer samples")?
            }
        };
        if interleaved.is_empty() {
            anyhow::bail!("WAV payload contains no samples");
        }

        let mono: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(VoiceBuffer {
            samples: resample_linear(&mono, spec.sample_rate, target_rate),
            sample_rate: target_rate,
        })
    }
}

/// Linear-interpolation sample rate conversion.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).round().max(1.0) as usize;
    read_at_rate(input, ratio, out_len)
}

/// Read `input` at `step` source samples per output sample.
pub fn read_at_rate(input: &[f32], step: f64, out_len: usize) -> Vec<f32> {
    let last = input.len().saturating_sub(1);
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;
            input[idx] + (input[next] - input[idx]) * frac
        })
        .collect()
}
