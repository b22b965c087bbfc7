//! Text and voice generation collaborators.
//!
//! Both are plain HTTP services. Failures are returned as errors; the
//! orchestrator owns the fallbacks (fixed lines, silence, local speech).

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::process::Command;

use crate::config::Config;

/// Lines spoken when the text generator is unavailable.
pub const FALLBACK_LINES: [&str; 6] = [
    "...can you hear me...",
    "...so cold here...",
    "...behind you...",
    "...not alone...",
    "...the signal is fading...",
    "...leave this place...",
];

pub fn fallback_line() -> &'static str {
    FALLBACK_LINES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_LINES[0])
}

const SYSTEM_PROMPT: &str = "You are a faint voice breaking through radio static. \
Answer in one short, cryptic sentence of no more than twelve words.";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `context_scalar` is the presence reading that let this turn through.
    async fn generate(&self, input: &str, context_scalar: f64) -> Result<String>;
}

#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    /// Returns encoded audio bytes (WAV).
    async fn synthesize(&self, text: &str) -> Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub text_url: String,
    pub text_model: String,
    pub text_api_key: String,
    pub voice_url: String,
    pub voice_model: String,
    pub voice_name: String,
    pub voice_api_key: String,
    pub request_timeout: Duration,
    /// Local TTS program, e.g. "espeak-ng". Empty disables it.
    pub speech_fallback_command: String,
}

impl From<&Config> for GeneratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            text_url: config.gen_text_url.to_string(),
            text_model: config.gen_text_model.to_string(),
            text_api_key: config.gen_text_api_key.to_string(),
            voice_url: config.gen_voice_url.to_string(),
            voice_model: config.gen_voice_model.to_string(),
            voice_name: config.gen_voice_name.to_string(),
            voice_api_key: config.gen_voice_api_key.to_string(),
            request_timeout: Duration::from_secs(config.gen_request_timeout_secs),
            speech_fallback_command: config.gen_speech_fallback_command.to_string(),
        }
    }
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .with_context(|| "Failed to build HTTP client")
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct HttpTextGenerator {
    client: Client,
    url: String,
    model: String,
    api_key: String,
}

impl HttpTextGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.request_timeout)?,
            url: config.text_url.clone(),
            model: config.text_model.clone(),
            api_key: config.text_api_key.clone(),
        })
    }
}

fn extract_reply(resp: ChatResponse) -> Result<String> {
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        anyhow::bail!("text generator returned an empty reply");
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, input: &str, context_scalar: f64) -> Result<String> {
        if self.url.is_empty() || self.api_key.is_empty() {
            anyhow::bail!("text generator not configured");
        }
        let body = json!({
            "model": self.model,
            "max_tokens": 60,
            "messages": [
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage {
                    role: "user",
                    content: format!("(signal strength {:.2}) {}", context_scalar, input),
                },
            ],
        });

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;
        if !resp.status().is_success() {
            anyhow::bail!("text generator returned {}", resp.status());
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .with_context(|| "Malformed chat completion")?;
        extract_reply(parsed)
    }
}

/// OpenAI-compatible speech endpoint returning WAV.
pub struct HttpVoiceSynthesizer {
    client: Client,
    url: String,
    model: String,
    voice: String,
    api_key: String,
}

impl HttpVoiceSynthesizer {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.request_timeout)?,
            url: config.voice_url.clone(),
            model: config.voice_model.clone(),
            voice: config.voice_name.clone(),
            api_key: config.voice_api_key.clone(),
        })
    }
}

#[async_trait]
impl VoiceSynthesizer for HttpVoiceSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        if self.url.is_empty() || self.api_key.is_empty() {
            anyhow::bail!("voice synthesizer not configured");
        }
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
                "response_format": "wav",
            }))
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;
        if !resp.status().is_success() {
            anyhow::bail!("voice synthesizer returned {}", resp.status());
        }
        let bytes = resp.bytes().await.with_context(|| "Failed to read voice body")?;
        if bytes.is_empty() {
            anyhow::bail!("voice synthesizer returned no audio");
        }
        Ok(bytes)
    }
}

/// Speaks text through a local TTS program when synthesis failed.
#[derive(Debug, Clone)]
pub struct SpeechFallback {
    command: String,
}

impl SpeechFallback {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.trim().to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.command.is_empty()
    }

    /// Spawn the speech program and return without waiting for it.
    pub fn speak(&self, text: &str) -> Result<()> {
        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            return Ok(());
        };
        let mut child = Command::new(program)
            .args(parts)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("Failed to spawn speech fallback {}", program))?;

        let program = program.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    log::warn!("Speech fallback {} exited with {}", program, status)
                }
                Ok(_) => {}
                Err(e) => log::warn!("Speech fallback {} failed: {}", program, e),
            }
        });
        Ok(())
    }
}
