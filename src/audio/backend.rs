//! Output backends: the step that turns a suspended audio context into one
//! that is actually audible.

use std::time::{Duration, Instant};

use anyhow::Result;

/// The host refused to start audio output.
#[derive(Debug, thiserror::Error)]
#[error("audio activation refused: {reason}")]
pub struct AudioActivationError {
    pub reason: String,
}

impl AudioActivationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Stream parameters requested from, or negotiated with, a device.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// An open, writable output stream.
pub trait AudioSink: Send {
    /// Negotiated parameters.
    fn params(&self) -> &StreamParams;

    /// Write interleaved f32 frames, blocking until the device accepted them.
    fn write(&mut self, interleaved: &[f32]) -> Result<()>;
}

/// Something that can open an [`AudioSink`].
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn activate(&self, params: &StreamParams) -> Result<Box<dyn AudioSink>>;
}

/// Factory function: pick a backend by the configured name.
pub fn create_backend(name: &str, device: &str) -> Box<dyn AudioBackend> {
    match name {
        #[cfg(feature = "alsa")]
        "alsa" => Box::new(super::alsa_device::AlsaBackend::new(device)),
        #[cfg(not(feature = "alsa"))]
        "alsa" => {
            log::warn!(
                "ALSA backend requested for '{}' but built without the `alsa` feature, rendering to a null sink",
                device
            );
            Box::new(NullBackend)
        }
        "null" => Box::new(NullBackend),
        other => {
            log::warn!("Unknown audio backend '{}', rendering to a null sink", other);
            Box::new(NullBackend)
        }
    }
}

/// Discards audio but consumes it at the real-time rate, so the render loop
/// is paced exactly like it would be against hardware.
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn activate(&self, params: &StreamParams) -> Result<Box<dyn AudioSink>> {
        if params.sample_rate == 0 || params.channels == 0 {
            anyhow::bail!("invalid stream parameters: {:?}", params);
        }
        Ok(Box::new(NullSink {
            params: params.clone(),
            started: None,
            frames_written: 0,
        }))
    }
}

struct NullSink {
    params: StreamParams,
    started: Option<Instant>,
    frames_written: u64,
}

impl AudioSink for NullSink {
    fn params(&self) -> &StreamParams {
        &self.params
    }

    fn write(&mut self, interleaved: &[f32]) -> Result<()> {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.frames_written += (interleaved.len() / self.params.channels as usize) as u64;
        let due = started
            + Duration::from_secs_f64(self.frames_written as f64 / self.params.sample_rate as f64);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
        Ok(())
    }
}
