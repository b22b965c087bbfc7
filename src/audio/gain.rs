//! Lock-free gain stage shared between the control side and the render thread.
//!
//! The control side publishes a `(target, ramp_frames)` pair packed into one
//! `AtomicU64` and bumps an epoch counter; the render thread notices the new
//! epoch and starts a linear ramp from whatever value it is currently at.
//! All gains are clamped to [0, 1].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

struct GainShared {
    /// High 32 bits: target as f32 bits, low 32 bits: ramp length in frames
    command: AtomicU64,
    epoch: AtomicU32,
    /// Last value produced by the render thread (f32 bits)
    current: AtomicU32,
}

fn pack(target: f32, frames: u32) -> u64 {
    ((target.to_bits() as u64) << 32) | frames as u64
}

fn unpack(word: u64) -> (f32, u32) {
    (f32::from_bits((word >> 32) as u32), word as u32)
}

/// Control handle for a gain stage. Cheap to clone.
#[derive(Clone)]
pub struct Gain {
    shared: Arc<GainShared>,
}

impl Gain {
    pub fn new(initial: f32) -> Self {
        let initial = initial.clamp(0.0, 1.0);
        Self {
            shared: Arc::new(GainShared {
                command: AtomicU64::new(pack(initial, 0)),
                epoch: AtomicU32::new(0),
                current: AtomicU32::new(initial.to_bits()),
            }),
        }
    }

    /// Jump to `value` on the next rendered frame.
    pub fn set(&self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        self.publish(value, 0);
        self.shared.current.store(value.to_bits(), Ordering::Release);
    }

    /// Ramp linearly from the current value to `value` over `frames` frames.
    pub fn ramp_to(&self, value: f32, frames: u32) {
        self.publish(value.clamp(0.0, 1.0), frames);
    }

    fn publish(&self, target: f32, frames: u32) {
        self.shared.command.store(pack(target, frames), Ordering::Release);
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// The value the gain is heading to.
    pub fn target(&self) -> f32 {
        unpack(self.shared.command.load(Ordering::Acquire)).0
    }

    /// Length of the most recently requested ramp; zero for an immediate set.
    pub fn ramp_frames(&self) -> u32 {
        unpack(self.shared.command.load(Ordering::Acquire)).1
    }

    /// Last value the render thread produced.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.shared.current.load(Ordering::Acquire))
    }

    /// Render-side view of this gain.
    pub fn ramp(&self) -> GainRamp {
        let (target, _) = unpack(self.shared.command.load(Ordering::Acquire));
        GainRamp {
            shared: self.shared.clone(),
            seen_epoch: self.shared.epoch.load(Ordering::Acquire),
            value: target,
            target,
            step: 0.0,
            remaining: 0,
        }
    }
}

/// Per-sample gain generator owned by the render thread.
pub struct GainRamp {
    shared: Arc<GainShared>,
    seen_epoch: u32,
    value: f32,
    /// Where the current ramp lands
    target: f32,
    step: f32,
    remaining: u32,
}

impl GainRamp {
    /// Pick up any pending command. Called once per rendered block.
    pub fn update(&mut self) {
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        if epoch == self.seen_epoch {
            return;
        }
        self.seen_epoch = epoch;
        let (target, frames) = unpack(self.shared.command.load(Ordering::Acquire));
        self.target = target;
        if frames == 0 {
            self.value = target;
            self.step = 0.0;
            self.remaining = 0;
        } else {
            self.step = (target - self.value) / frames as f32;
            self.remaining = frames;
        }
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                // land exactly; a newer command waits for the next update()
                self.value = self.target;
            } else {
                self.value = (self.value + self.step).clamp(0.0, 1.0);
            }
        }
        self.value
    }

    /// Publish the current value for observers. Called once per rendered block.
    pub fn publish(&self) {
        self.shared.current.store(self.value.to_bits(), Ordering::Release);
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps_to_unit_range() {
        let gain = Gain::new(0.5);
        for (input, expected) in [(-1.0, 0.0), (0.0, 0.0), (0.25, 0.25), (1.0, 1.0), (7.5, 1.0)] {
            gain.set(input);
            assert_eq!(gain.target(), expected);
            assert_eq!(gain.value(), expected);
        }
    }

    #[test]
    fn ramp_moves_monotonically_without_jumps() {
        let gain = Gain::new(1.0);
        let mut ramp = gain.ramp();
        gain.ramp_to(0.0, 100);
        ramp.update();

        let mut previous = 1.0f32;
        for _ in 0..100 {
            let v = ramp.next();
            assert!(v <= previous);
            assert!(previous - v <= 0.0101);
            previous = v;
        }
        assert_eq!(previous, 0.0);
        assert!(!ramp.is_ramping());
    }

    #[test]
    fn retarget_mid_ramp_starts_from_current_value() {
        let gain = Gain::new(1.0);
        let mut ramp = gain.ramp();
        gain.ramp_to(0.0, 100);
        ramp.update();
        for _ in 0..50 {
            ramp.next();
        }
        let midway = ramp.next();

        gain.ramp_to(1.0, 100);
        ramp.update();
        let first = ramp.next();
        assert!((first - midway).abs() < 0.02);
        assert_eq!(gain.target(), 1.0);
    }

    #[test]
    fn command_published_mid_block_does_not_cut_the_ramp_short() {
        let gain = Gain::new(1.0);
        let mut ramp = gain.ramp();
        gain.ramp_to(0.1, 10);
        ramp.update();
        let mut previous = 1.0f32;
        for _ in 0..9 {
            previous = ramp.next();
        }

        // Arrives while the render thread is still inside this block.
        gain.ramp_to(1.0, 10);
        let last = ramp.next();
        assert!((last - 0.1).abs() < 1e-6);
        assert!((previous - last).abs() <= 0.0901);

        ramp.update();
        let mut previous = last;
        for _ in 0..10 {
            let v = ramp.next();
            assert!(v >= previous);
            assert!(v - previous <= 0.0901);
            previous = v;
        }
        assert_eq!(previous, 1.0);
    }
}
