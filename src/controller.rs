use crate::orchestrator::{Orchestrator, SessionEvent, TurnOutcome};
use crate::protocol::{ControlCommand, InputEvent};
use crate::visualizer_bridge::VisualizerBridge;
use std::sync::Arc;

/// Routes bridge events into the orchestrator and session events out to the
/// visualizer.
pub struct CoreController {
    orchestrator: Orchestrator,
    visualizer: Arc<VisualizerBridge>,
}

impl CoreController {
    pub fn new(orchestrator: Orchestrator, visualizer: Arc<VisualizerBridge>) -> Self {
        Self {
            orchestrator,
            visualizer,
        }
    }

    pub async fn start_session(&self) {
        if let Err(e) = self.orchestrator.start() {
            log::error!("Session did not start: {}", e);
            if let Err(e) = self.visualizer.send_error("session did not start").await {
                log::warn!("Failed to send to visualizer: {}", e);
            }
        }
    }

    pub async fn handle_input_event(&self, event: InputEvent) {
        match event {
            InputEvent::Utterance(text) => {
                // 回合在独立任务中运行，主循环继续处理控制命令
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move {
                    match orchestrator.submit_input(&text).await {
                        TurnOutcome::Ignored => log::debug!("Utterance ignored: {}", text),
                        outcome => log::info!("Turn finished: {:?}", outcome),
                    }
                });
            }
            InputEvent::Control(ControlCommand::StartSession) => self.start_session().await,
            InputEvent::Control(ControlCommand::StopSession) => self.orchestrator.stop(),
            InputEvent::Control(ControlCommand::DebugOverride(enabled)) => {
                self.orchestrator.set_debug_override(enabled)
            }
            InputEvent::Control(ControlCommand::Volume(level)) => {
                self.orchestrator.set_volume(level)
            }
            InputEvent::Control(ControlCommand::Status) => {
                let snapshot = self.orchestrator.snapshot();
                if let Err(e) = self.visualizer.send_snapshot(&snapshot).await {
                    log::warn!("Failed to send to visualizer: {}", e);
                }
            }
        }
    }

    pub async fn handle_session_event(&self, event: SessionEvent) {
        let result = match &event {
            SessionEvent::StateChanged(state) => self.visualizer.send_state(*state).await,
            SessionEvent::TranscriptAppended(entry) => {
                self.visualizer.send_transcript(entry).await
            }
        };
        if let Err(e) = result {
            log::warn!("Failed to send to visualizer: {}", e);
        }
    }

    /// Push one analysis frame; nothing is sent while no graph is running.
    pub async fn publish_frame(&self) {
        let Some(tap) = self.orchestrator.analysis_tap() else {
            return;
        };
        if let Err(e) = self.visualizer.send_spectrum(&tap).await {
            log::debug!("Failed to send spectrum frame: {}", e);
        }
    }
}
