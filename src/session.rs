use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Inactive,
    Active,
    Processing,
    Responding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Input,
    Voice,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<f64>,
}

/// Mutable state of one session. Lives behind the orchestrator's lock.
#[derive(Debug)]
pub struct Session {
    pub state: SessionState,
    transcript: Vec<TranscriptEntry>,
    pub last_reading: Option<f64>,
    pub debug_override: bool,
    /// Bumped on every start/stop; turns holding an older value are stale.
    epoch: u64,
}

impl Session {
    pub fn new(debug_override: bool) -> Self {
        Self {
            state: SessionState::Inactive,
            transcript: Vec::new(),
            last_reading: None,
            debug_override,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Clear per-session data and invalidate in-flight turns. The debug flag
    /// is an operator setting and survives.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.last_reading = None;
        self.epoch += 1;
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Append an entry. Timestamps never go backwards even if the wall
    /// clock does.
    pub fn append(&mut self, speaker: Speaker, text: &str, presence: Option<f64>) -> TranscriptEntry {
        let now = Utc::now();
        let timestamp = match self.transcript.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let entry = TranscriptEntry {
            id: Uuid::new_v4(),
            timestamp,
            speaker,
            text: text.to_string(),
            presence,
        };
        self.transcript.push(entry.clone());
        entry
    }
}
