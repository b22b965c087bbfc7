//! Per-response voice effects: slowed playback, muffling low-pass,
//! waveshaper distortion and a synthetic convolution reverb mixed wet/dry.
//!
//! Every call to [`EffectsChain::apply`] builds a fresh [`EffectsInstance`];
//! the stateful stages (filter memory, convolver) are never shared between
//! responses.

use std::f32::consts::PI;
use std::sync::Arc;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, Q_BUTTERWORTH_F32, ToHertz, Type};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realfft::RealFftPlanner;

use crate::config::Config;

use super::decoder::{VoiceBuffer, read_at_rate};
use super::graph::VoiceSource;

/// Convolver normalisation constants (matching the usual convolver node).
const GAIN_CALIBRATION: f32 = 0.00125;
const MIN_POWER: f32 = 0.000125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;

#[derive(Debug, Clone)]
pub struct EffectsConfig {
    /// Playback rate factor, < 1 deepens and slows the voice
    pub playback_rate: f64,
    pub lowpass_hz: f32,
    /// Waveshaper intensity `k`
    pub distortion_amount: f32,
    pub curve_samples: usize,
    pub reverb_decay_secs: f32,
    pub wet_gain: f32,
    pub dry_gain: f32,
    /// Seed for the impulse-response noise, random when absent
    pub seed: Option<u64>,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            playback_rate: 0.85,
            lowpass_hz: 2000.0,
            distortion_amount: 40.0,
            curve_samples: 44100,
            reverb_decay_secs: 3.0,
            wet_gain: 0.85,
            dry_gain: 0.15,
            seed: None,
        }
    }
}

impl From<&Config> for EffectsConfig {
    fn from(config: &Config) -> Self {
        Self {
            playback_rate: config.effects_playback_rate,
            lowpass_hz: config.effects_lowpass_hz,
            distortion_amount: config.effects_distortion_amount,
            curve_samples: config.effects_curve_samples,
            reverb_decay_secs: config.effects_reverb_decay_secs,
            wet_gain: config.effects_wet_gain,
            dry_gain: config.effects_dry_gain,
            seed: None,
        }
    }
}

/// `curve[i] = (3+k)·x·20·(π/180) / (π + k·|x|)` for `x` from -1 to 1.
pub fn distortion_curve(k: f32, samples: usize) -> Vec<f32> {
    let n = samples.max(2);
    let deg = PI / 180.0;
    (0..n)
        .map(|i| {
            let x = i as f32 * 2.0 / n as f32 - 1.0;
            (3.0 + k) * x * 20.0 * deg / (PI + k * x.abs())
        })
        .collect()
}

/// Two-channel exponentially decaying filtered noise.
pub fn impulse_response(sample_rate: u32, decay_secs: f32, rng: &mut StdRng) -> [Vec<f32>; 2] {
    let len = ((decay_secs.max(0.0) * sample_rate as f32) as usize).max(1);
    let mut channel = || {
        let mut smoothed = 0.0f32;
        (0..len)
            .map(|i| {
                let white: f32 = rng.gen_range(-1.0..=1.0);
                // One-pole low-pass takes the fizz off the tail
                smoothed += 0.6 * (white - smoothed);
                smoothed * (1.0 - i as f32 / len as f32).powi(2)
            })
            .collect::<Vec<f32>>()
    };
    let left = channel();
    let right = channel();
    [left, right]
}

/// Builds effects instances. Holds only immutable, precomputed data.
#[derive(Clone)]
pub struct EffectsChain {
    config: EffectsConfig,
    curve: Arc<[f32]>,
}

impl EffectsChain {
    pub fn new(config: EffectsConfig) -> Self {
        let curve = distortion_curve(config.distortion_amount, config.curve_samples).into();
        Self { config, curve }
    }

    pub fn config(&self) -> &EffectsConfig {
        &self.config
    }

    /// Run `buffer` through a fresh effects instance. Returns the unstarted
    /// source and its audible duration (`buffer duration / playback rate`).
    pub fn apply(&self, buffer: &VoiceBuffer, sample_rate: u32) -> (VoiceSource, f64) {
        let rate = self.playback_rate();
        let duration = buffer.duration_secs() / rate;
        let mut instance = EffectsInstance::new(self, sample_rate);
        let frames = instance.process(buffer, rate);
        log::debug!(
            "Effects applied: {} input samples, {} output frames, {:.2}s audible",
            buffer.samples.len(),
            frames.len() / 2,
            duration
        );
        (VoiceSource::new(frames), duration)
    }

    /// Route `buffer` to stereo with no processing at all.
    pub fn bypass(buffer: &VoiceBuffer) -> (VoiceSource, f64) {
        let frames = buffer.samples.iter().flat_map(|&s| [s, s]).collect();
        (VoiceSource::new(frames), buffer.duration_secs())
    }

    fn playback_rate(&self) -> f64 {
        if self.config.playback_rate.is_finite() && self.config.playback_rate > 0.0 {
            self.config.playback_rate
        } else {
            1.0
        }
    }
}

/// One-shot processing chain for a single voice buffer.
pub struct EffectsInstance<'a> {
    chain: &'a EffectsChain,
    sample_rate: u32,
    filter: Option<DirectForm2Transposed<f32>>,
    rng: StdRng,
}

impl<'a> EffectsInstance<'a> {
    fn new(chain: &'a EffectsChain, sample_rate: u32) -> Self {
        let cutoff = chain
            .config
            .lowpass_hz
            .clamp(10.0, sample_rate as f32 * 0.45);
        let filter = Coefficients::<f32>::from_params(
            Type::LowPass,
            (sample_rate as f32).hz(),
            cutoff.hz(),
            Q_BUTTERWORTH_F32,
        )
        .map(DirectForm2Transposed::<f32>::new)
        .map_err(|e| log::warn!("Voice low-pass unavailable ({:?}), skipping stage", e))
        .ok();
        let rng = match chain.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            chain,
            sample_rate,
            filter,
            rng,
        }
    }

    /// Returns interleaved stereo frames including the reverb tail.
    fn process(&mut self, buffer: &VoiceBuffer, rate: f64) -> Vec<f32> {
        if buffer.samples.is_empty() {
            return Vec::new();
        }

        // 1. playback rate (also folds in any buffer/context rate mismatch)
        let step = rate * buffer.sample_rate as f64 / self.sample_rate as f64;
        let out_len = ((buffer.samples.len() as f64) / step).ceil().max(1.0) as usize;
        let mut signal = read_at_rate(&buffer.samples, step, out_len);

        // 2. low-pass
        if let Some(filter) = self.filter.as_mut() {
            for s in signal.iter_mut() {
                *s = filter.run(*s);
            }
        }

        // 3. waveshaper
        for s in signal.iter_mut() {
            *s = shape(&self.chain.curve, *s);
        }

        // 4. wet (convolver) and dry paths summed
        let ir = impulse_response(self.sample_rate, self.chain.config.reverb_decay_secs, &mut self.rng);
        let scale = normalization_scale(&ir, self.sample_rate);
        let wet = [convolve(&signal, &ir[0]), convolve(&signal, &ir[1])];

        let total = signal.len() + ir[0].len() - 1;
        let wet_gain = self.chain.config.wet_gain * scale;
        let dry_gain = self.chain.config.dry_gain;
        let mut frames = Vec::with_capacity(total * 2);
        for i in 0..total {
            let dry = signal.get(i).copied().unwrap_or(0.0) * dry_gain;
            for channel in &wet {
                frames.push(dry + channel.get(i).copied().unwrap_or(0.0) * wet_gain);
            }
        }
        frames
    }
}

/// Waveshaper lookup with linear interpolation; input clamped to [-1, 1].
fn shape(curve: &[f32], x: f32) -> f32 {
    let n = curve.len();
    let v = (n - 1) as f32 * 0.5 * (x.clamp(-1.0, 1.0) + 1.0);
    let idx = (v.floor() as usize).min(n - 1);
    let next = (idx + 1).min(n - 1);
    let frac = v - idx as f32;
    curve[idx] + (curve[next] - curve[idx]) * frac
}

fn normalization_scale(ir: &[Vec<f32>; 2], sample_rate: u32) -> f32 {
    let len = ir[0].len().max(1);
    let energy: f32 = ir.iter().flat_map(|c| c.iter()).map(|s| s * s).sum();
    let power = (energy / (ir.len() * len) as f32).sqrt();
    let power = if power.is_finite() { power.max(MIN_POWER) } else { MIN_POWER };
    GAIN_CALIBRATION / power * (GAIN_CALIBRATION_SAMPLE_RATE / sample_rate.max(1) as f32)
}

/// Linear convolution via one zero-padded real FFT.
fn convolve(signal: &[f32], kernel: &[f32]) -> Vec<f32> {
    let out_len = signal.len() + kernel.len() - 1;
    let n = out_len.next_power_of_two();
    let mut planner = RealFftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut a = forward.make_input_vec();
    a[..signal.len()].copy_from_slice(signal);
    let mut b = forward.make_input_vec();
    b[..kernel.len()].copy_from_slice(kernel);

    let mut fa = forward.make_output_vec();
    let mut fb = forward.make_output_vec();
    if forward.process(&mut a, &mut fa).is_err() || forward.process(&mut b, &mut fb).is_err() {
        log::warn!("Forward FFT failed, reverb path silent");
        return vec![0.0; out_len];
    }
    for (x, y) in fa.iter_mut().zip(&fb) {
        *x *= *y;
    }
    // Imaginary parts of DC and Nyquist must be zero for the inverse
    if let Some(first) = fa.first_mut() {
        first.im = 0.0;
    }
    if let Some(last) = fa.last_mut() {
        last.im = 0.0;
    }

    let mut out = inverse.make_output_vec();
    if inverse.process(&mut fa, &mut out).is_err() {
        log::warn!("Inverse FFT failed, reverb path silent");
        return vec![0.0; out_len];
    }
    let norm = 1.0 / n as f32;
    out.truncate(out_len);
    out.iter_mut().for_each(|s| *s *= norm);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::silent_buffer;

    fn chain(rate: f64) -> EffectsChain {
        EffectsChain::new(EffectsConfig {
            playback_rate: rate,
            curve_samples: 1024,
            reverb_decay_secs: 0.05,
            seed: Some(11),
            ..EffectsConfig::default()
        })
    }

    fn tone(seconds: f64, sample_rate: u32) -> VoiceBuffer {
        let len = (seconds * sample_rate as f64) as usize;
        VoiceBuffer {
            samples: (0..len)
                .map(|i| 0.5 * (2.0 * PI * 220.0 * i as f32 / sample_rate as f32).sin())
                .collect(),
            sample_rate,
        }
    }

    #[test]
    fn reported_duration_is_buffer_duration_over_rate() {
        for (seconds, rate) in [(1.0, 0.85), (0.5, 0.5), (2.0, 1.0), (0.25, 0.7)] {
            let (_voice, duration) = chain(rate).apply(&tone(seconds, 8000), 8000);
            assert!((duration - seconds / rate).abs() < 1e-9, "rate {}", rate);
        }
    }

    #[test]
    fn output_covers_slowed_voice_plus_tail() {
        let chain = chain(0.5);
        let (voice, _) = chain.apply(&tone(0.5, 8000), 8000);
        // 4000 samples slowed to 8000 frames plus a 400-sample tail
        assert_eq!(voice.len_frames(), 8000 + 400 - 1);
    }

    #[test]
    fn curve_is_odd_and_harsher_with_intensity() {
        let soft = distortion_curve(5.0, 1001);
        let hard = distortion_curve(400.0, 1001);
        assert_eq!(soft.len(), 1001);
        assert!((soft[0] + soft[1000]).abs() < 0.01);
        assert!(soft[500].abs() < 2e-3);

        // Near the origin the harsher curve saturates earlier relative to its peak
        let ratio = |c: &[f32]| c[600] / c[1000];
        assert!(ratio(&hard) > ratio(&soft));
    }

    #[test]
    fn shape_interpolates_and_clamps() {
        let curve = [-1.0, 0.0, 1.0];
        assert_eq!(shape(&curve, 0.0), 0.0);
        assert_eq!(shape(&curve, 0.5), 0.5);
        assert_eq!(shape(&curve, 5.0), 1.0);
        assert_eq!(shape(&curve, -5.0), -1.0);
    }

    #[test]
    fn convolving_with_unit_impulse_is_identity() {
        let signal = [0.1, -0.2, 0.3, 0.4];
        let out = convolve(&signal, &[1.0]);
        assert_eq!(out.len(), 4);
        for (a, b) in out.iter().zip(&signal) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn impulse_response_decays() {
        let mut rng = StdRng::seed_from_u64(5);
        let [left, right] = impulse_response(8000, 1.0, &mut rng);
        assert_eq!(left.len(), 8000);
        assert_eq!(right.len(), 8000);
        assert_ne!(left, right);
        let energy = |s: &[f32]| s.iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&left[..1000]) > 10.0 * energy(&left[7000..]));
    }

    #[test]
    fn bypass_keeps_silence_and_timing() {
        let (voice, duration) = EffectsChain::bypass(&silent_buffer(2.0, 8000));
        assert_eq!(duration, 2.0);
        assert_eq!(voice.len_frames(), 16000);
    }

    #[test]
    fn processed_output_is_finite() {
        let (voice, _) = chain(0.85).apply(&tone(0.3, 8000), 8000);
        assert!(voice.frames().iter().all(|s| s.is_finite()));
        assert!(voice.frames().iter().any(|s| *s != 0.0));
    }
}
