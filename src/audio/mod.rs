//! audio - Noise bed, voice effects and playback graph
//!
//! Everything audible is rendered on one dedicated thread into an output
//! backend (ALSA by default, or a paced null sink when configured or built
//! without the `alsa` feature). The control side talks to it through
//! lock-free gain handles and a bounded voice channel.

#[cfg(feature = "alsa")]
mod alsa_device;
pub mod analysis;
pub mod backend;
pub mod decoder;
pub mod effects;
mod gain;
pub mod graph;
mod noise;

pub use analysis::AnalysisTap;
pub use backend::{AudioActivationError, create_backend};
pub use decoder::{VoiceDecoder, WavDecoder, silent_buffer};
pub use effects::{EffectsChain, EffectsConfig};
pub use graph::{AudioConfig, GraphManager, GraphPhase, VoiceSource};
