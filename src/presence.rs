//! Presence gate: one bounded entropy query per turn, normalised to a scalar
//! in [0, 1] and compared against the response threshold.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    PrimarySource,
    FallbackRandom,
    DebugOverride,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl PresenceReading {
    pub fn new(value: f64, provenance: Provenance) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
            provenance,
            metadata: None,
        }
    }

    fn fallback_random() -> Self {
        let value = rand::thread_rng().gen_range(0.0..=1.0);
        Self::new(value, Provenance::FallbackRandom)
    }
}

/// External source of "presence" readings.
#[async_trait]
pub trait EntropySource: Send + Sync {
    async fn query(&self) -> Result<PresenceReading>;
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Inclusive response threshold
    pub threshold: f64,
    pub debug_value: f64,
    pub timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.45,
            debug_value: 0.85,
            timeout: Duration::from_millis(3000),
        }
    }
}

impl From<&Config> for GateConfig {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.presence_threshold,
            debug_value: config.presence_debug_value,
            timeout: Duration::from_millis(config.presence_timeout_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateDecision {
    pub respond: bool,
    pub reading: PresenceReading,
}

pub struct PresenceGate {
    source: Box<dyn EntropySource>,
    config: GateConfig,
}

impl PresenceGate {
    pub fn new(source: Box<dyn EntropySource>, config: GateConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Never fails: errors, timeouts and out-of-range values all fall back
    /// to a uniformly random reading.
    pub async fn check(&self, debug_override: bool) -> GateDecision {
        let reading = if debug_override {
            PresenceReading::new(self.config.debug_value, Provenance::DebugOverride)
        } else {
            match tokio::time::timeout(self.config.timeout, self.source.query()).await {
                Ok(Ok(reading)) if (0.0..=1.0).contains(&reading.value) => reading,
                Ok(Ok(reading)) => {
                    log::warn!("Entropy value {} out of range, using random fallback", reading.value);
                    PresenceReading::fallback_random()
                }
                Ok(Err(e)) => {
                    log::warn!("Entropy query failed: {:#}, using random fallback", e);
                    PresenceReading::fallback_random()
                }
                Err(_) => {
                    log::warn!(
                        "Entropy query timed out after {:?}, using random fallback",
                        self.config.timeout
                    );
                    PresenceReading::fallback_random()
                }
            }
        };

        let respond = reading.value >= self.config.threshold;
        log::info!(
            "Presence {:.3} ({:?}) -> {}",
            reading.value,
            reading.provenance,
            if respond { "respond" } else { "silent" }
        );
        GateDecision { respond, reading }
    }
}

// Blend weights. The random term dominates the measured factors; kept as-is
// until there is a requirement for how much the real data should matter.
const BASELINE: f64 = 0.15;
const KP_WEIGHT: f64 = 0.10;
const WIND_WEIGHT: f64 = 0.10;
const DENSITY_WEIGHT: f64 = 0.05;
const RANDOM_WEIGHT: f64 = 0.60;

const KP_MAX: f64 = 9.0;
const WIND_MIN_KMS: f64 = 250.0;
const WIND_MAX_KMS: f64 = 800.0;
const DENSITY_MAX: f64 = 20.0;

#[derive(Debug, Deserialize)]
struct SpaceWeather {
    kp_index: f64,
    solar_wind_speed: f64,
    proton_density: f64,
}

/// Blend space-weather factors with a random draw into a presence scalar.
pub fn blend_space_weather(kp: f64, wind_speed: f64, density: f64, random: f64) -> (f64, Value) {
    let kp_norm = (kp / KP_MAX).clamp(0.0, 1.0);
    let wind_norm = ((wind_speed - WIND_MIN_KMS) / (WIND_MAX_KMS - WIND_MIN_KMS)).clamp(0.0, 1.0);
    let density_norm = (density / DENSITY_MAX).clamp(0.0, 1.0);

    let value = (BASELINE
        + KP_WEIGHT * kp_norm
        + WIND_WEIGHT * wind_norm
        + DENSITY_WEIGHT * density_norm
        + RANDOM_WEIGHT * random)
        .clamp(0.0, 1.0);

    let metadata = json!({
        "kp_index": kp,
        "solar_wind_speed": wind_speed,
        "proton_density": density,
        "random": random,
        "weights": {
            "baseline": BASELINE,
            "kp": KP_WEIGHT,
            "wind": WIND_WEIGHT,
            "density": DENSITY_WEIGHT,
            "random": RANDOM_WEIGHT,
        },
    });
    (value, metadata)
}

/// Entropy source backed by a JSON space-weather endpoint.
pub struct HttpEntropySource {
    client: Client,
    /// None when no endpoint is configured; every query then fails
    url: Option<Url>,
}

impl HttpEntropySource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = match url.trim() {
            "" => None,
            raw => Some(Url::parse(raw).with_context(|| format!("Invalid entropy url {}", raw))?),
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "Failed to build entropy HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EntropySource for HttpEntropySource {
    async fn query(&self) -> Result<PresenceReading> {
        let Some(url) = &self.url else {
            anyhow::bail!("no entropy endpoint configured");
        };
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("entropy endpoint returned {}", resp.status());
        }
        let weather: SpaceWeather = resp
            .json()
            .await
            .with_context(|| "Malformed space-weather payload")?;

        let random = rand::thread_rng().gen_range(0.0..=1.0);
        let (value, metadata) = blend_space_weather(
            weather.kp_index,
            weather.solar_wind_speed,
            weather.proton_density,
            random,
        );
        Ok(PresenceReading {
            metadata: Some(metadata),
            ..PresenceReading::new(value, Provenance::PrimarySource)
        })
    }
}
