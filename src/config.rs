use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    // 音频输出配置
    pub audio_backend: &'static str,
    pub audio_playback_device: &'static str,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub audio_period_size: usize,

    // Noise bed
    pub noise_filter_min_hz: f32,
    pub noise_filter_max_hz: f32,
    pub noise_sweep_period_secs: f32,
    pub noise_filter_q: f32,
    pub noise_nominal_gain: f32,
    pub noise_ducked_gain: f32,
    pub noise_duck_ramp_ms: u32,
    pub noise_master_gain: f32,

    // Voice effects
    pub effects_playback_rate: f64,
    pub effects_lowpass_hz: f32,
    pub effects_distortion_amount: f32,
    pub effects_curve_samples: usize,
    pub effects_reverb_decay_secs: f32,
    pub effects_wet_gain: f32,
    pub effects_dry_gain: f32,

    // Presence gate
    pub presence_threshold: f64,
    pub presence_debug_value: f64,
    pub presence_timeout_ms: u64,
    pub presence_entropy_url: &'static str,

    // 生成服务
    pub gen_text_url: &'static str,
    pub gen_text_model: &'static str,
    pub gen_text_api_key: &'static str,
    pub gen_voice_url: &'static str,
    pub gen_voice_model: &'static str,
    pub gen_voice_name: &'static str,
    pub gen_voice_api_key: &'static str,
    pub gen_request_timeout_secs: u64,
    pub gen_speech_fallback_command: &'static str,

    // Session
    pub session_settle_margin_ms: u64,
    pub session_autostart: bool,
    pub session_fft_size: usize,
    pub session_debug_override: bool,

    // 本地 UDP 桥接
    pub bridge_input_local_port: u16,
    pub bridge_visualizer_remote_ip: &'static str,
    pub bridge_visualizer_remote_port: u16,
    pub bridge_visualizer_frame_ms: u64,
    pub bridge_buffer_size: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            audio_backend: env!("AUDIO_BACKEND"),
            audio_playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            audio_sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            audio_channels: env!("AUDIO_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            audio_period_size: env!("AUDIO_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PERIOD_SIZE")?,

            noise_filter_min_hz: env!("NOISE_FILTER_MIN_HZ").parse()
                .map_err(|_| "Failed to parse NOISE_FILTER_MIN_HZ")?,
            noise_filter_max_hz: env!("NOISE_FILTER_MAX_HZ").parse()
                .map_err(|_| "Failed to parse NOISE_FILTER_MAX_HZ")?,
            noise_sweep_period_secs: env!("NOISE_SWEEP_PERIOD_SECS").parse()
                .map_err(|_| "Failed to parse NOISE_SWEEP_PERIOD_SECS")?,
            noise_filter_q: env!("NOISE_FILTER_Q").parse()
                .map_err(|_| "Failed to parse NOISE_FILTER_Q")?,
            noise_nominal_gain: env!("NOISE_NOMINAL_GAIN").parse()
                .map_err(|_| "Failed to parse NOISE_NOMINAL_GAIN")?,
            noise_ducked_gain: env!("NOISE_DUCKED_GAIN").parse()
                .map_err(|_| "Failed to parse NOISE_DUCKED_GAIN")?,
            noise_duck_ramp_ms: env!("NOISE_DUCK_RAMP_MS").parse()
                .map_err(|_| "Failed to parse NOISE_DUCK_RAMP_MS")?,
            noise_master_gain: env!("NOISE_MASTER_GAIN").parse()
                .map_err(|_| "Failed to parse NOISE_MASTER_GAIN")?,

            effects_playback_rate: env!("EFFECTS_PLAYBACK_RATE").parse()
                .map_err(|_| "Failed to parse EFFECTS_PLAYBACK_RATE")?,
            effects_lowpass_hz: env!("EFFECTS_LOWPASS_HZ").parse()
                .map_err(|_| "Failed to parse EFFECTS_LOWPASS_HZ")?,
            effects_distortion_amount: env!("EFFECTS_DISTORTION_AMOUNT").parse()
                .map_err(|_| "Failed to parse EFFECTS_DISTORTION_AMOUNT")?,
            effects_curve_samples: env!("EFFECTS_CURVE_SAMPLES").parse()
                .map_err(|_| "Failed to parse EFFECTS_CURVE_SAMPLES")?,
            effects_reverb_decay_secs: env!("EFFECTS_REVERB_DECAY_SECS").parse()
                .map_err(|_| "Failed to parse EFFECTS_REVERB_DECAY_SECS")?,
            effects_wet_gain: env!("EFFECTS_WET_GAIN").parse()
                .map_err(|_| "Failed to parse EFFECTS_WET_GAIN")?,
            effects_dry_gain: env!("EFFECTS_DRY_GAIN").parse()
                .map_err(|_| "Failed to parse EFFECTS_DRY_GAIN")?,

            presence_threshold: env!("PRESENCE_THRESHOLD").parse()
                .map_err(|_| "Failed to parse PRESENCE_THRESHOLD")?,
            presence_debug_value: env!("PRESENCE_DEBUG_VALUE").parse()
                .map_err(|_| "Failed to parse PRESENCE_DEBUG_VALUE")?,
            presence_timeout_ms: env!("PRESENCE_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse PRESENCE_TIMEOUT_MS")?,
            presence_entropy_url: env!("PRESENCE_ENTROPY_URL"),

            gen_text_url: env!("GEN_TEXT_URL"),
            gen_text_model: env!("GEN_TEXT_MODEL"),
            gen_text_api_key: env!("GEN_TEXT_API_KEY"),
            gen_voice_url: env!("GEN_VOICE_URL"),
            gen_voice_model: env!("GEN_VOICE_MODEL"),
            gen_voice_name: env!("GEN_VOICE_NAME"),
            gen_voice_api_key: env!("GEN_VOICE_API_KEY"),
            gen_request_timeout_secs: env!("GEN_REQUEST_TIMEOUT_SECS").parse()
                .map_err(|_| "Failed to parse GEN_REQUEST_TIMEOUT_SECS")?,
            gen_speech_fallback_command: env!("GEN_SPEECH_FALLBACK_COMMAND"),

            session_settle_margin_ms: env!("SESSION_SETTLE_MARGIN_MS").parse()
                .map_err(|_| "Failed to parse SESSION_SETTLE_MARGIN_MS")?,
            session_autostart: env!("SESSION_AUTOSTART").parse()
                .map_err(|_| "Failed to parse SESSION_AUTOSTART")?,
            session_fft_size: env!("SESSION_FFT_SIZE").parse()
                .map_err(|_| "Failed to parse SESSION_FFT_SIZE")?,
            session_debug_override: env!("SESSION_DEBUG_OVERRIDE").parse()
                .map_err(|_| "Failed to parse SESSION_DEBUG_OVERRIDE")?,

            bridge_input_local_port: env!("BRIDGE_INPUT_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse BRIDGE_INPUT_LOCAL_PORT")?,
            bridge_visualizer_remote_ip: env!("BRIDGE_VISUALIZER_REMOTE_IP"),
            bridge_visualizer_remote_port: env!("BRIDGE_VISUALIZER_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse BRIDGE_VISUALIZER_REMOTE_PORT")?,
            bridge_visualizer_frame_ms: env!("BRIDGE_VISUALIZER_FRAME_MS").parse()
                .map_err(|_| "Failed to parse BRIDGE_VISUALIZER_FRAME_MS")?,
            bridge_buffer_size: env!("BRIDGE_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse BRIDGE_BUFFER_SIZE")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.audio_sample_rate > 0);
        assert!(config.noise_filter_min_hz < config.noise_filter_max_hz);
        assert!(config.effects_playback_rate > 0.0 && config.effects_playback_rate < 1.0);
        assert!((0.0..=1.0).contains(&config.presence_threshold));
    }
}
