use crate::config::Config;
use crate::orchestrator::InputCapture;
use crate::protocol::{InputEvent, parse_datagram};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Receives utterances and control commands from the speech-to-text / UI
/// process over local UDP.
pub struct InputBridge {
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<InputEvent>,
    listening: AtomicBool,
    buffer_size: usize,
}

impl InputBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<InputEvent>) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        Self::bind(
            &format!("0.0.0.0:{}", config.bridge_input_local_port),
            tx,
            config.bridge_buffer_size,
        )
        .await
    }

    pub async fn bind(
        addr: &str,
        tx: mpsc::Sender<InputEvent>,
        buffer_size: usize,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        log::info!("Input bridge listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            tx,
            listening: AtomicBool::new(false),
            buffer_size: buffer_size.max(512),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Dropping non-UTF-8 datagram from {}", peer);
                continue;
            };
            let Some(event) = parse_datagram(msg) else {
                continue;
            };

            // 回合进行中丢弃识别结果，控制命令始终转发
            if let InputEvent::Utterance(text) = &event {
                if !self.listening.load(Ordering::SeqCst) {
                    log::debug!("Input paused, dropping utterance: {}", text);
                    continue;
                }
            }

            if let Err(e) = self.tx.send(event).await {
                log::error!("Failed to send input event: {}", e);
                break;
            }
        }
        Ok(())
    }
}

impl InputCapture for InputBridge {
    fn resume(&self) {
        self.listening.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }
}
