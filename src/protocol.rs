use serde::{Deserialize, Serialize};

use crate::orchestrator::SessionSnapshot;
use crate::session::{SessionState, TranscriptEntry};

/// Inbound datagram from the speech-to-text / UI process.
#[derive(Deserialize, Debug, Clone)]
pub struct BridgeMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: Option<String>, // stt
    pub state: Option<String>, // session start/stop
    pub enabled: Option<bool>, // debug
    pub level: Option<f32>, // volume
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    StartSession,
    StopSession,
    DebugOverride(bool),
    Volume(f32),
    /// Ask for a full session snapshot
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// A finalized utterance
    Utterance(String),
    Control(ControlCommand),
}

/// Parse one datagram. Plain text (anything that is not a JSON object) is
/// taken as an utterance.
pub fn parse_datagram(payload: &str) -> Option<InputEvent> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    let msg: BridgeMessage = match serde_json::from_str(payload) {
        Ok(msg) => msg,
        Err(_) if !payload.starts_with('{') => {
            return Some(InputEvent::Utterance(payload.to_string()));
        }
        Err(e) => {
            log::warn!("Malformed bridge message: {}", e);
            return None;
        }
    };

    match msg.msg_type.as_str() {
        "stt" => msg
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(InputEvent::Utterance),
        "session" => match msg.state.as_deref() {
            Some("start") => Some(InputEvent::Control(ControlCommand::StartSession)),
            Some("stop") => Some(InputEvent::Control(ControlCommand::StopSession)),
            other => {
                log::warn!("Unknown session state: {:?}", other);
                None
            }
        },
        "debug" => msg
            .enabled
            .map(|e| InputEvent::Control(ControlCommand::DebugOverride(e))),
        "volume" => msg
            .level
            .map(|l| InputEvent::Control(ControlCommand::Volume(l))),
        "status" => Some(InputEvent::Control(ControlCommand::Status)),
        other => {
            log::debug!("Unhandled message type: {}", other);
            None
        }
    }
}

/// Outbound message to the visualizer process.
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VisualizerMessage<'a> {
    Spectrum { bins: Vec<u8>, level: f32 },
    State { state: SessionState },
    Transcript { entry: &'a TranscriptEntry },
    Snapshot { session: &'a SessionSnapshot },
    Error { message: &'a str },
}
