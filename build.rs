use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    noise: Noise,
    effects: Effects,
    presence: Presence,
    generators: Generators,
    session: Session,
    bridge: Bridge,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    backend: String,
    playback_device: String,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
}

#[derive(Deserialize)]
struct Noise {
    filter_min_hz: f32,
    filter_max_hz: f32,
    sweep_period_secs: f32,
    filter_q: f32,
    nominal_gain: f32,
    ducked_gain: f32,
    duck_ramp_ms: u32,
    master_gain: f32,
}

#[derive(Deserialize)]
struct Effects {
    playback_rate: f64,
    lowpass_hz: f32,
    distortion_amount: f32,
    curve_samples: usize,
    reverb_decay_secs: f32,
    wet_gain: f32,
    dry_gain: f32,
}

#[derive(Deserialize)]
struct Presence {
    threshold: f64,
    debug_value: f64,
    timeout_ms: u64,
    entropy_url: String,
}

#[derive(Deserialize)]
struct Generators {
    text_url: String,
    text_model: String,
    text_api_key: String,
    voice_url: String,
    voice_model: String,
    voice_name: String,
    voice_api_key: String,
    request_timeout_secs: u64,
    speech_fallback_command: String,
}

#[derive(Deserialize)]
struct Session {
    settle_margin_ms: u64,
    autostart: bool,
    fft_size: usize,
    debug_override: bool,
}

#[derive(Deserialize)]
struct Bridge {
    input_local_port: u16,
    visualizer_remote_ip: String,
    visualizer_remote_port: u16,
    visualizer_frame_ms: u64,
    buffer_size: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_BACKEND={}", config.audio.backend);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_PERIOD_SIZE={}", config.audio.period_size);

    // Noise bed
    println!("cargo:rustc-env=NOISE_FILTER_MIN_HZ={}", config.noise.filter_min_hz);
    println!("cargo:rustc-env=NOISE_FILTER_MAX_HZ={}", config.noise.filter_max_hz);
    println!("cargo:rustc-env=NOISE_SWEEP_PERIOD_SECS={}", config.noise.sweep_period_secs);
    println!("cargo:rustc-env=NOISE_FILTER_Q={}", config.noise.filter_q);
    println!("cargo:rustc-env=NOISE_NOMINAL_GAIN={}", config.noise.nominal_gain);
    println!("cargo:rustc-env=NOISE_DUCKED_GAIN={}", config.noise.ducked_gain);
    println!("cargo:rustc-env=NOISE_DUCK_RAMP_MS={}", config.noise.duck_ramp_ms);
    println!("cargo:rustc-env=NOISE_MASTER_GAIN={}", config.noise.master_gain);

    // Voice effects
    println!("cargo:rustc-env=EFFECTS_PLAYBACK_RATE={}", config.effects.playback_rate);
    println!("cargo:rustc-env=EFFECTS_LOWPASS_HZ={}", config.effects.lowpass_hz);
    println!("cargo:rustc-env=EFFECTS_DISTORTION_AMOUNT={}", config.effects.distortion_amount);
    println!("cargo:rustc-env=EFFECTS_CURVE_SAMPLES={}", config.effects.curve_samples);
    println!("cargo:rustc-env=EFFECTS_REVERB_DECAY_SECS={}", config.effects.reverb_decay_secs);
    println!("cargo:rustc-env=EFFECTS_WET_GAIN={}", config.effects.wet_gain);
    println!("cargo:rustc-env=EFFECTS_DRY_GAIN={}", config.effects.dry_gain);

    // Presence gate
    println!("cargo:rustc-env=PRESENCE_THRESHOLD={}", config.presence.threshold);
    println!("cargo:rustc-env=PRESENCE_DEBUG_VALUE={}", config.presence.debug_value);
    println!("cargo:rustc-env=PRESENCE_TIMEOUT_MS={}", config.presence.timeout_ms);
    println!("cargo:rustc-env=PRESENCE_ENTROPY_URL={}", config.presence.entropy_url);

    // 生成服务配置
    println!("cargo:rustc-env=GEN_TEXT_URL={}", config.generators.text_url);
    println!("cargo:rustc-env=GEN_TEXT_MODEL={}", config.generators.text_model);
    println!("cargo:rustc-env=GEN_TEXT_API_KEY={}", config.generators.text_api_key);
    println!("cargo:rustc-env=GEN_VOICE_URL={}", config.generators.voice_url);
    println!("cargo:rustc-env=GEN_VOICE_MODEL={}", config.generators.voice_model);
    println!("cargo:rustc-env=GEN_VOICE_NAME={}", config.generators.voice_name);
    println!("cargo:rustc-env=GEN_VOICE_API_KEY={}", config.generators.voice_api_key);
    println!("cargo:rustc-env=GEN_REQUEST_TIMEOUT_SECS={}", config.generators.request_timeout_secs);
    println!("cargo:rustc-env=GEN_SPEECH_FALLBACK_COMMAND={}", config.generators.speech_fallback_command);

    // Session
    println!("cargo:rustc-env=SESSION_SETTLE_MARGIN_MS={}", config.session.settle_margin_ms);
    println!("cargo:rustc-env=SESSION_AUTOSTART={}", config.session.autostart);
    println!("cargo:rustc-env=SESSION_FFT_SIZE={}", config.session.fft_size);
    println!("cargo:rustc-env=SESSION_DEBUG_OVERRIDE={}", config.session.debug_override);

    // 本地 UDP 桥接
    println!("cargo:rustc-env=BRIDGE_INPUT_LOCAL_PORT={}", config.bridge.input_local_port);
    println!("cargo:rustc-env=BRIDGE_VISUALIZER_REMOTE_IP={}", config.bridge.visualizer_remote_ip);
    println!("cargo:rustc-env=BRIDGE_VISUALIZER_REMOTE_PORT={}", config.bridge.visualizer_remote_port);
    println!("cargo:rustc-env=BRIDGE_VISUALIZER_FRAME_MS={}", config.bridge.visualizer_frame_ms);
    println!("cargo:rustc-env=BRIDGE_BUFFER_SIZE={}", config.bridge.buffer_size);
}
