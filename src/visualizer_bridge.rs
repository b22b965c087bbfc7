use crate::audio::AnalysisTap;
use crate::config::Config;
use crate::orchestrator::SessionSnapshot;
use crate::protocol::VisualizerMessage;
use crate::session::{SessionState, TranscriptEntry};
use tokio::net::UdpSocket;

/// Pushes spectrum frames and session events to the visualizer process.
pub struct VisualizerBridge {
    socket: UdpSocket,
    target_addr: String,
}

impl VisualizerBridge {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        Self::connect(&format!(
            "{}:{}",
            config.bridge_visualizer_remote_ip, config.bridge_visualizer_remote_port
        ))
        .await
    }

    pub async fn connect(target_addr: &str) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
        })
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }

    async fn send(&self, msg: &VisualizerMessage<'_>) -> anyhow::Result<()> {
        self.send_message(&serde_json::to_string(msg)?).await
    }

    /// One frame of post-mix analysis data.
    pub async fn send_spectrum(&self, tap: &AnalysisTap) -> anyhow::Result<()> {
        self.send(&VisualizerMessage::Spectrum {
            bins: tap.frequency_data(),
            level: tap.level(),
        })
        .await
    }

    pub async fn send_state(&self, state: SessionState) -> anyhow::Result<()> {
        self.send(&VisualizerMessage::State { state }).await
    }

    pub async fn send_transcript(&self, entry: &TranscriptEntry) -> anyhow::Result<()> {
        self.send(&VisualizerMessage::Transcript { entry }).await
    }

    pub async fn send_snapshot(&self, session: &SessionSnapshot) -> anyhow::Result<()> {
        self.send(&VisualizerMessage::Snapshot { session }).await
    }

    pub async fn send_error(&self, message: &str) -> anyhow::Result<()> {
        self.send(&VisualizerMessage::Error { message }).await
    }
}
