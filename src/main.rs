mod audio;
mod config;
mod controller;
mod generator;
mod input_bridge;
mod orchestrator;
mod presence;
mod protocol;
mod session;
mod visualizer_bridge;

use audio::{AudioConfig, EffectsChain, EffectsConfig, GraphManager, WavDecoder, create_backend};
use config::Config;
use controller::CoreController;
use generator::{GeneratorConfig, HttpTextGenerator, HttpVoiceSynthesizer, SpeechFallback};
use input_bridge::InputBridge;
use orchestrator::{Collaborators, Orchestrator, SessionEvent, TurnConfig};
use presence::{GateConfig, HttpEntropySource, PresenceGate};
use protocol::InputEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();
    log::info!("{} {} starting", env!("APP_NAME"), env!("APP_VERSION"));

    // 创建通道，用于组件间通信
    let (tx_input_event, mut rx_input_event) = mpsc::channel::<InputEvent>(100);
    let (tx_session_event, mut rx_session_event) = mpsc::channel::<SessionEvent>(100);

    // 启动输入桥，接收语音识别结果和控制命令
    let input_bridge = Arc::new(InputBridge::new(&config, tx_input_event).await?);
    let input_bridge_clone = input_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = input_bridge_clone.run().await {
            log::error!("InputBridge error: {}", e);
        }
    });

    let visualizer = Arc::new(visualizer_bridge::VisualizerBridge::new(&config).await?);

    let gate_config = GateConfig::from(&config);
    let entropy = HttpEntropySource::new(config.presence_entropy_url, gate_config.timeout)?;
    let gen_config = GeneratorConfig::from(&config);

    let graph = GraphManager::new(
        AudioConfig::from(&config),
        create_backend(config.audio_backend, config.audio_playback_device),
    );
    let orchestrator = Orchestrator::new(
        graph,
        Collaborators {
            gate: PresenceGate::new(Box::new(entropy), gate_config),
            text: Arc::new(HttpTextGenerator::new(&gen_config)?),
            voice: Arc::new(HttpVoiceSynthesizer::new(&gen_config)?),
            decoder: Arc::new(WavDecoder),
            input: input_bridge.clone(),
            effects: EffectsChain::new(EffectsConfig::from(&config)),
            speech: SpeechFallback::new(&gen_config.speech_fallback_command),
        },
        TurnConfig::from(&config),
        config.session_debug_override,
        tx_session_event,
    );
    let controller = CoreController::new(orchestrator.clone(), visualizer);

    if config.session_autostart {
        controller.start_session().await;
    }

    let mut frame_tick =
        tokio::time::interval(Duration::from_millis(config.bridge_visualizer_frame_ms.max(10)));
    frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::info!("Ghostbox core started. State: {:?}", orchestrator.state());

    // 主事件循环
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_input_event.recv() => {
                controller.handle_input_event(event).await;
            }

            Some(event) = rx_session_event.recv() => {
                controller.handle_session_event(event).await;
            }

            _ = frame_tick.tick() => {
                controller.publish_frame().await;
            }
        }
    }

    orchestrator.stop();
    Ok(())
}
