//! Post-mix analysis tap for visualizers.
//!
//! The render thread pushes the mono mixdown of every block into a ring
//! (skipping the block if a reader currently holds the lock); readers pull
//! byte-scaled spectrum and waveform data at their own cadence.

use std::f32::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

struct Ring {
    samples: Vec<f32>,
    pos: usize,
}

struct Spectrum {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

struct AnalysisShared {
    fft_size: usize,
    ring: Mutex<Ring>,
    spectrum: Mutex<Spectrum>,
}

/// Read-only analysis handle. Cheap to clone.
#[derive(Clone)]
pub struct AnalysisTap {
    shared: Arc<AnalysisShared>,
}

/// Render-side writer feeding an [`AnalysisTap`].
pub struct AnalysisWriter {
    shared: Arc<AnalysisShared>,
}

pub fn analysis_tap(fft_size: usize) -> (AnalysisWriter, AnalysisTap) {
    let fft_size = fft_size.next_power_of_two().clamp(32, 32768);
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let input = fft.make_input_vec();
    let output = fft.make_output_vec();

    // Blackman window
    let window = (0..fft_size)
        .map(|i| {
            let x = i as f32 / fft_size as f32;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect();

    let shared = Arc::new(AnalysisShared {
        fft_size,
        ring: Mutex::new(Ring {
            samples: vec![0.0; fft_size],
            pos: 0,
        }),
        spectrum: Mutex::new(Spectrum {
            fft,
            window,
            input,
            output,
            smoothed: vec![0.0; fft_size / 2],
        }),
    });
    (
        AnalysisWriter {
            shared: shared.clone(),
        },
        AnalysisTap { shared },
    )
}

impl AnalysisWriter {
    /// Push an interleaved block. Never blocks.
    pub fn write(&self, interleaved: &[f32], channels: usize) {
        let Ok(mut ring) = self.shared.ring.try_lock() else {
            return;
        };
        let channels = channels.max(1);
        let len = ring.samples.len();
        for frame in interleaved.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            let pos = ring.pos;
            ring.samples[pos] = mono;
            ring.pos = (pos + 1) % len;
        }
    }
}

impl AnalysisTap {
    pub fn fft_size(&self) -> usize {
        self.shared.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.shared.fft_size / 2
    }

    /// Most recent `fft_size` samples, oldest first.
    fn snapshot(&self) -> Vec<f32> {
        let ring = self.shared.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::with_capacity(ring.samples.len());
        out.extend_from_slice(&ring.samples[ring.pos..]);
        out.extend_from_slice(&ring.samples[..ring.pos]);
        out
    }

    /// Waveform scaled to bytes, 128 being silence.
    pub fn time_domain_data(&self) -> Vec<u8> {
        self.snapshot()
            .into_iter()
            .map(|s| (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8)
            .collect()
    }

    /// RMS level of the current window.
    pub fn level(&self) -> f32 {
        let samples = self.snapshot();
        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len() as f32).sqrt()
    }

    /// Smoothed magnitude spectrum in decibels, mapped to bytes between
    /// -100 dB (0) and -30 dB (255).
    pub fn frequency_data(&self) -> Vec<u8> {
        let samples = self.snapshot();
        let mut guard = self
            .shared
            .spectrum
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let spectrum = &mut *guard;

        for ((dst, src), w) in spectrum.input.iter_mut().zip(&samples).zip(&spectrum.window) {
            *dst = src * w;
        }
        if let Err(e) = spectrum.fft.process(&mut spectrum.input, &mut spectrum.output) {
            log::warn!("Analysis FFT failed: {}", e);
            return vec![0; spectrum.smoothed.len()];
        }

        let scale = 1.0 / self.shared.fft_size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        spectrum
            .smoothed
            .iter_mut()
            .zip(&spectrum.output)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
                let db = 20.0 * smoothed.max(1e-12).log10();
                (255.0 * (db - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_as_floor() {
        let (_writer, tap) = analysis_tap(256);
        assert_eq!(tap.frequency_bin_count(), 128);
        assert!(tap.frequency_data().iter().all(|&b| b == 0));
        assert!(tap.time_domain_data().iter().all(|&b| b == 128));
        assert_eq!(tap.level(), 0.0);
    }

    #[test]
    fn tone_shows_up_in_its_bin() {
        let (writer, tap) = analysis_tap(256);
        // Bin 16 of a 256-point FFT, stereo interleaved
        let block: Vec<f32> = (0..256)
            .flat_map(|i| {
                let s = 0.01 * (2.0 * PI * 16.0 * i as f32 / 256.0).sin();
                [s, s]
            })
            .collect();
        writer.write(&block, 2);

        let mut bins = tap.frequency_data();
        for _ in 0..20 {
            bins = tap.frequency_data();
        }
        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| **b)
            .map(|(i, _)| i)
            .unwrap();
        assert!((15..=17).contains(&peak));
        assert!(tap.level() > 0.005);
    }

    #[test]
    fn fft_size_is_rounded_to_power_of_two() {
        let (_writer, tap) = analysis_tap(1000);
        assert_eq!(tap.fft_size(), 1024);
    }
}
