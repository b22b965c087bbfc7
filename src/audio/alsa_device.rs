//! ALSA PCM playback backend.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::backend::{AudioBackend, AudioSink, StreamParams};

/// Maximum recoveries per write before the remaining frames are dropped.
const MAX_RECOVERY_RETRIES: u32 = 3;

pub struct AlsaBackend {
    device: String,
}

impl AlsaBackend {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn name(&self) -> &str {
        "alsa"
    }

    fn activate(&self, params: &StreamParams) -> Result<Box<dyn AudioSink>> {
        let (pcm, negotiated) = open_playback(
            &self.device,
            params.sample_rate,
            params.channels,
            Some(params.period_size),
        )?;
        let scratch = vec![0i16; negotiated.period_size * negotiated.channels as usize];
        Ok(Box::new(AlsaSink {
            pcm,
            params: negotiated,
            scratch,
        }))
    }
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, StreamParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for Playback", device))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm.hw_params_current()?;
        StreamParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA Playback: device={}, rate={}, channels={}, period_size={}",
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

struct AlsaSink {
    pcm: PCM,
    params: StreamParams,
    scratch: Vec<i16>,
}

impl AudioSink for AlsaSink {
    fn params(&self) -> &StreamParams {
        &self.params
    }

    fn write(&mut self, interleaved: &[f32]) -> Result<()> {
        if self.scratch.len() < interleaved.len() {
            self.scratch.resize(interleaved.len(), 0);
        }
        for (dst, src) in self.scratch.iter_mut().zip(interleaved) {
            *dst = (src.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        }
        let pcm_data = &self.scratch[..interleaved.len()];

        let io = self.pcm.io_i16()?;
        let channels = self.params.channels as usize;
        let total_frames = pcm_data.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        // Short writes and XRUNs are retried without losing frames
        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&pcm_data[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm
                        .prepare()
                        .with_context(|| "Failed to recover PCM playback")?;
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
