//! Analog-static noise bed: uniform white noise through a resonant low-pass
//! whose cutoff breathes between two frequencies under a sine LFO.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::gain::{Gain, GainRamp};
use super::graph::AudioConfig;

/// Filter coefficients are refreshed every this many samples.
const CONTROL_INTERVAL: usize = 32;

/// Render-side half of the noise synthesizer.
pub struct NoiseSynth {
    rng: StdRng,
    filter: DirectForm2Transposed<f32>,
    sample_rate: f32,
    min_hz: f32,
    max_hz: f32,
    q: f32,
    lfo_phase: f32,
    lfo_increment: f32,
    until_refresh: usize,
    gain: GainRamp,
    running: Arc<AtomicBool>,
}

/// Control-side half of the noise synthesizer.
#[derive(Clone)]
pub struct NoiseControl {
    running: Arc<AtomicBool>,
    gain: Gain,
}

/// Build a noise synthesizer pair. `seed` makes the output reproducible.
pub fn noise_synth(config: &AudioConfig, seed: Option<u64>) -> (NoiseSynth, NoiseControl) {
    let running = Arc::new(AtomicBool::new(false));
    let gain = Gain::new(config.noise_gain);
    let sample_rate = config.sample_rate as f32;
    let nyquist_guard = sample_rate * 0.45;
    let min_hz = config.filter_min_hz.clamp(10.0, nyquist_guard);
    let max_hz = config.filter_max_hz.clamp(min_hz, nyquist_guard);
    let q = config.filter_q.max(0.1);
    let period = config.sweep_period_secs.max(0.01);

    let coeffs = lowpass(sample_rate, min_hz, q).unwrap_or(Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    });

    let synth = NoiseSynth {
        rng: match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        },
        filter: DirectForm2Transposed::<f32>::new(coeffs),
        sample_rate,
        min_hz,
        max_hz,
        q,
        lfo_phase: 0.0,
        lfo_increment: TAU / (period * sample_rate),
        until_refresh: 0,
        gain: gain.ramp(),
        running: running.clone(),
    };
    (synth, NoiseControl { running, gain })
}

fn lowpass(sample_rate: f32, cutoff: f32, q: f32) -> Option<Coefficients<f32>> {
    Coefficients::<f32>::from_params(Type::LowPass, sample_rate.hz(), cutoff.hz(), q).ok()
}

impl NoiseSynth {
    /// Current cutoff of the swept filter in Hz.
    pub fn cutoff(&self) -> f32 {
        self.min_hz + (self.max_hz - self.min_hz) * (0.5 + 0.5 * self.lfo_phase.sin())
    }

    /// Fill `out` with mono noise-bed samples. Runs on the render thread.
    pub fn fill_buffer(&mut self, out: &mut [f32]) {
        self.gain.update();
        if !self.running.load(Ordering::Relaxed) {
            out.fill(0.0);
            self.gain.publish();
            return;
        }

        for sample in out.iter_mut() {
            if self.until_refresh == 0 {
                if let Some(coeffs) = lowpass(self.sample_rate, self.cutoff(), self.q) {
                    self.filter.update_coefficients(coeffs);
                }
                self.until_refresh = CONTROL_INTERVAL;
            }
            self.until_refresh -= 1;

            self.lfo_phase += self.lfo_increment;
            if self.lfo_phase >= TAU {
                self.lfo_phase -= TAU;
            }

            let white: f32 = self.rng.gen_range(-1.0..=1.0);
            *sample = self.filter.run(white) * self.gain.next();
        }
        self.gain.publish();
    }
}

impl NoiseControl {
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            log::debug!("Noise oscillator started");
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::debug!("Noise oscillator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Set the output gain immediately. Clamped to [0, 1].
    pub fn set_volume(&self, level: f32) {
        self.gain.set(level);
    }

    pub fn gain(&self) -> &Gain {
        &self.gain
    }
}
