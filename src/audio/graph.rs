//! The graph manager owns the audio context, the render thread and every
//! node of the noise-bed graph.
//!
//! Uses a dedicated std::thread (NOT a tokio task) for rendering, so the
//! real-time loop never competes with the cooperative scheduler.
//!
//! ```text
//! NoiseSource ──► NoiseFilter ──► NoiseGain ──┐
//! SweepOscillator ─(frequency)─┘               ├──► MasterGain ──► Destination
//!                                  VoiceBus ──┘          └──────► Analyser
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError, sync_channel};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;

use super::analysis::{AnalysisTap, AnalysisWriter, analysis_tap};
use super::backend::{AudioActivationError, AudioBackend, AudioSink, StreamParams};
use super::gain::{Gain, GainRamp};
use super::noise::{NoiseControl, NoiseSynth, noise_synth};

/// Voices mixed simultaneously; further voices wait in the channel.
const MAX_VOICES: usize = 4;

/// Graph configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub backend: String,
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    pub playback_device: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// Render period in frames
    pub period_size: usize,
    pub filter_min_hz: f32,
    pub filter_max_hz: f32,
    pub sweep_period_secs: f32,
    pub filter_q: f32,
    /// Nominal (un-ducked) noise gain
    pub noise_gain: f32,
    pub ducked_gain: f32,
    pub duck_ramp_ms: u32,
    pub master_gain: f32,
    pub fft_size: usize,
    pub noise_seed: Option<u64>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: "null".to_string(),
            playback_device: "default".to_string(),
            sample_rate: 44100,
            channels: 2,
            period_size: 1024,
            filter_min_hz: 400.0,
            filter_max_hz: 2400.0,
            sweep_period_secs: 8.0,
            filter_q: 4.0,
            noise_gain: 0.3,
            ducked_gain: 0.08,
            duck_ramp_ms: 100,
            master_gain: 0.8,
            fft_size: 2048,
            noise_seed: None,
        }
    }
}

impl From<&Config> for AudioConfig {
    fn from(config: &Config) -> Self {
        Self {
            backend: config.audio_backend.to_string(),
            playback_device: config.audio_playback_device.to_string(),
            sample_rate: config.audio_sample_rate,
            channels: config.audio_channels,
            period_size: config.audio_period_size,
            filter_min_hz: config.noise_filter_min_hz,
            filter_max_hz: config.noise_filter_max_hz,
            sweep_period_secs: config.noise_sweep_period_secs,
            filter_q: config.noise_filter_q,
            noise_gain: config.noise_nominal_gain,
            ducked_gain: config.noise_ducked_gain,
            duck_ramp_ms: config.noise_duck_ramp_ms,
            master_gain: config.noise_master_gain,
            fft_size: config.session_fft_size,
            noise_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    /// Created but not yet audible
    Suspended,
    Running,
    Closed,
}

/// Handle for one audio processing context.
#[derive(Debug)]
pub struct AudioContext {
    id: Uuid,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
    state: ContextState,
}

impl AudioContext {
    fn new(config: &AudioConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            sample_rate: config.sample_rate,
            channels: config.channels.max(1),
            period_size: config.period_size.max(1),
            state: ContextState::Suspended,
        }
    }

    fn resume(&mut self, negotiated: &StreamParams) {
        self.sample_rate = negotiated.sample_rate;
        self.channels = negotiated.channels.max(1);
        self.period_size = negotiated.period_size.max(1);
        self.state = ContextState::Running;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            period_size: self.period_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    NoiseSource,
    SweepOscillator,
    NoiseFilter,
    NoiseGain,
    VoiceBus,
    MasterGain,
    Analyser,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub from: NodeKind,
    pub to: NodeKind,
    /// Parameter input when the connection modulates rather than feeds audio
    pub param: Option<&'static str>,
}

/// Description of every node created for a session and how they are wired.
#[derive(Debug, Clone, Serialize)]
pub struct GraphTopology {
    pub context_id: Uuid,
    pub nodes: Vec<NodeKind>,
    pub connections: Vec<Connection>,
}

impl GraphTopology {
    fn noise_bed(context_id: Uuid) -> Self {
        use NodeKind::*;
        let link = |from, to| Connection {
            from,
            to,
            param: None,
        };
        Self {
            context_id,
            nodes: vec![
                NoiseSource,
                SweepOscillator,
                NoiseFilter,
                NoiseGain,
                VoiceBus,
                MasterGain,
                Analyser,
                Destination,
            ],
            connections: vec![
                link(NoiseSource, NoiseFilter),
                Connection {
                    from: SweepOscillator,
                    to: NoiseFilter,
                    param: Some("frequency"),
                },
                link(NoiseFilter, NoiseGain),
                link(NoiseGain, MasterGain),
                link(VoiceBus, MasterGain),
                link(MasterGain, Analyser),
                link(MasterGain, Destination),
            ],
        }
    }

    pub fn is_connected(&self, from: NodeKind, to: NodeKind) -> bool {
        self.connections.iter().any(|c| c.from == from && c.to == to)
    }

    /// Whether `node` has a path to `target`.
    pub fn reaches(&self, node: NodeKind, target: NodeKind) -> bool {
        let mut queue = VecDeque::from([node]);
        let mut seen = vec![node];
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            for c in self.connections.iter().filter(|c| c.from == current) {
                if !seen.contains(&c.to) {
                    seen.push(c.to);
                    queue.push_back(c.to);
                }
            }
        }
        false
    }
}

/// A one-shot playable source of interleaved stereo frames. Created
/// unstarted; [`VoiceSource::start`] hands it to the voice bus.
pub struct VoiceSource {
    frames: Vec<f32>,
    position: usize,
}

impl VoiceSource {
    pub(crate) fn new(frames: Vec<f32>) -> Self {
        Self {
            frames,
            position: 0,
        }
    }

    pub fn len_frames(&self) -> usize {
        self.frames.len() / 2
    }

    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.position + 1 >= self.frames.len()
    }

    #[inline]
    fn next_frame(&mut self) -> (f32, f32) {
        if self.is_finished() {
            return (0.0, 0.0);
        }
        let frame = (self.frames[self.position], self.frames[self.position + 1]);
        self.position += 2;
        frame
    }

    /// Begin playback through `output`.
    pub fn start(self, output: &MasterOutput) -> Result<()> {
        output.connect(self)
    }
}

/// Mixing point for externally built voice sources.
#[derive(Clone)]
pub struct MasterOutput {
    tx: SyncSender<VoiceSource>,
    sample_rate: u32,
}

impl MasterOutput {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn connect(&self, voice: VoiceSource) -> Result<()> {
        match self.tx.try_send(voice) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => anyhow::bail!("voice bus is full"),
            Err(TrySendError::Disconnected(_)) => anyhow::bail!("audio graph is not running"),
        }
    }
}

/// Render-thread side of the graph.
pub struct Renderer {
    noise: NoiseSynth,
    master: GainRamp,
    voices: Vec<VoiceSource>,
    voice_rx: Receiver<VoiceSource>,
    tap: AnalysisWriter,
    channels: usize,
    scratch: Vec<f32>,
}

impl Renderer {
    /// Render one block of interleaved frames.
    pub fn render(&mut self, out: &mut [f32]) {
        while self.voices.len() < MAX_VOICES {
            match self.voice_rx.try_recv() {
                Ok(voice) => self.voices.push(voice),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.master.update();

        let channels = self.channels;
        for chunk in out.chunks_mut(self.scratch.len() * channels) {
            let frames = chunk.len() / channels;
            let noise = &mut self.scratch[..frames];
            self.noise.fill_buffer(noise);

            for (frame, n) in chunk.chunks_exact_mut(channels).zip(noise.iter()) {
                let (mut left, mut right) = (*n, *n);
                for voice in self.voices.iter_mut() {
                    let (l, r) = voice.next_frame();
                    left += l;
                    right += r;
                }
                let gain = self.master.next();
                for (c, sample) in frame.iter_mut().enumerate() {
                    let value = match (channels, c) {
                        (1, _) => 0.5 * (left + right),
                        (_, 0) => left,
                        (_, 1) => right,
                        _ => 0.5 * (left + right),
                    };
                    *sample = (value * gain).clamp(-1.0, 1.0);
                }
            }
            self.voices.retain(|v| !v.is_finished());
        }

        self.master.publish();
        self.tap.write(out, channels);
    }
}

/// Control-side handles of a built graph.
struct GraphNodes {
    noise: NoiseControl,
    master: Gain,
    output: MasterOutput,
    tap: AnalysisTap,
}

/// Explicit graph-building step: creates and wires every node. Nothing
/// produces sound until the noise oscillator is started.
fn build_graph(
    config: &AudioConfig,
    context: &AudioContext,
    noise_volume: f32,
) -> (Renderer, GraphNodes, GraphTopology) {
    let node_config = AudioConfig {
        sample_rate: context.sample_rate,
        noise_gain: noise_volume,
        ..config.clone()
    };
    let (noise, noise_control) = noise_synth(&node_config, config.noise_seed);
    let master = Gain::new(0.0);
    let (voice_tx, voice_rx) = sync_channel(MAX_VOICES);
    let (writer, tap) = analysis_tap(config.fft_size);

    let renderer = Renderer {
        noise,
        master: master.ramp(),
        voices: Vec::with_capacity(MAX_VOICES),
        voice_rx,
        tap: writer,
        channels: context.channels as usize,
        scratch: vec![0.0; context.period_size],
    };
    let nodes = GraphNodes {
        noise: noise_control,
        master,
        output: MasterOutput {
            tx: voice_tx,
            sample_rate: context.sample_rate,
        },
        tap,
    };
    (renderer, nodes, GraphTopology::noise_bed(context.id))
}

fn render_thread(mut renderer: Renderer, mut sink: Box<dyn AudioSink>, running: Arc<AtomicBool>) {
    let params = sink.params().clone();
    let mut buffer = vec![0.0f32; params.period_size.max(1) * params.channels.max(1) as usize];

    log::info!(
        "Render started: rate={}, ch={}, period={}",
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    while running.load(Ordering::Relaxed) {
        renderer.render(&mut buffer);
        if let Err(e) = sink.write(&buffer) {
            log::error!("Audio output error: {:#}", e);
            break;
        }
    }

    log::info!("Render stopped");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphPhase {
    Uninitialized,
    Idle,
    Running,
    Stopped,
}

struct RunningGraph {
    context: AudioContext,
    topology: GraphTopology,
    nodes: GraphNodes,
    running: Arc<AtomicBool>,
    render_handle: Option<JoinHandle<()>>,
}

enum GraphState {
    Uninitialized,
    Idle(AudioContext),
    Running(RunningGraph),
    Stopped,
}

/// Owns the audio context and the noise-bed graph for one session at a time.
pub struct GraphManager {
    config: AudioConfig,
    backend: Box<dyn AudioBackend>,
    state: GraphState,
    /// Nominal noise level; un-ducking returns here
    volume: f32,
    ducked: bool,
}

impl GraphManager {
    pub fn new(config: AudioConfig, backend: Box<dyn AudioBackend>) -> Self {
        let volume = config.noise_gain.clamp(0.0, 1.0);
        Self {
            config,
            backend,
            state: GraphState::Uninitialized,
            volume,
            ducked: false,
        }
    }

    pub fn phase(&self) -> GraphPhase {
        match self.state {
            GraphState::Uninitialized => GraphPhase::Uninitialized,
            GraphState::Idle(_) => GraphPhase::Idle,
            GraphState::Running(_) => GraphPhase::Running,
            GraphState::Stopped => GraphPhase::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, GraphState::Running(_))
    }

    /// Create the (suspended) context if there is none. Idempotent.
    pub fn initialize(&mut self) -> &AudioContext {
        if matches!(self.state, GraphState::Uninitialized | GraphState::Stopped) {
            let context = AudioContext::new(&self.config);
            log::info!(
                "Audio context {} created ({}Hz, {}ch, suspended)",
                context.id,
                context.sample_rate,
                context.channels
            );
            self.state = GraphState::Idle(context);
        }
        match &self.state {
            GraphState::Idle(context) => context,
            GraphState::Running(graph) => &graph.context,
            GraphState::Uninitialized | GraphState::Stopped => {
                unreachable!("context created above")
            }
        }
    }

    /// Activate the context, build the graph and start the noise bed.
    pub fn start_session(&mut self) -> Result<(), AudioActivationError> {
        if self.is_running() {
            log::debug!("Audio session already running");
            return Ok(());
        }
        self.initialize();
        let GraphState::Idle(mut context) =
            std::mem::replace(&mut self.state, GraphState::Uninitialized)
        else {
            return Err(AudioActivationError::new("no audio context"));
        };

        let sink = match self.backend.activate(&context.stream_params()) {
            Ok(sink) => sink,
            Err(e) => {
                log::error!("Audio activation via {} failed: {:#}", self.backend.name(), e);
                self.state = GraphState::Idle(context);
                return Err(AudioActivationError::new(format!("{:#}", e)));
            }
        };
        context.resume(sink.params());

        // All wiring happens before any source starts
        let (renderer, nodes, topology) = build_graph(&self.config, &context, self.volume);
        nodes.noise.start();
        nodes
            .master
            .ramp_to(self.config.master_gain, self.ramp_frames(context.sample_rate));
        self.ducked = false;

        let running = Arc::new(AtomicBool::new(true));
        let render_handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-render".into())
                .spawn(move || render_thread(renderer, sink, running))
        };
        let render_handle = match render_handle {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to spawn render thread: {}", e);
                nodes.noise.stop();
                self.state = GraphState::Idle(AudioContext::new(&self.config));
                return Err(AudioActivationError::new(format!("render thread: {}", e)));
            }
        };

        log::info!(
            "Audio session started on {} ({} nodes, {} connections)",
            self.backend.name(),
            topology.nodes.len(),
            topology.connections.len()
        );
        self.state = GraphState::Running(RunningGraph {
            context,
            topology,
            nodes,
            running,
            render_handle: Some(render_handle),
        });
        Ok(())
    }

    /// Stop the noise bed and release the context and every node. No-op
    /// when nothing is running.
    pub fn stop_session(&mut self) {
        match std::mem::replace(&mut self.state, GraphState::Stopped) {
            GraphState::Running(mut graph) => {
                graph.nodes.noise.stop();
                graph.running.store(false, Ordering::SeqCst);
                if let Some(handle) = graph.render_handle.take() {
                    if handle.join().is_err() {
                        log::error!("Render thread panicked");
                    }
                }
                graph.context.state = ContextState::Closed;
                self.ducked = false;
                log::info!("Audio session stopped, context {} released", graph.context.id);
            }
            GraphState::Idle(mut context) => {
                context.state = ContextState::Closed;
                log::info!("Audio context {} released before activation", context.id);
            }
            GraphState::Uninitialized => self.state = GraphState::Uninitialized,
            GraphState::Stopped => {}
        }
    }

    fn ramp_frames(&self, sample_rate: u32) -> u32 {
        (self.config.duck_ramp_ms as u64 * sample_rate as u64 / 1000).max(1) as u32
    }

    /// Ramp the noise bed down (`true`) or back to its nominal level.
    pub fn duck_noise(&mut self, enable: bool) {
        let GraphState::Running(graph) = &self.state else {
            log::debug!("duck_noise({}) ignored, graph not running", enable);
            return;
        };
        let target = if enable {
            self.config.ducked_gain
        } else {
            self.volume
        };
        let frames = self.ramp_frames(graph.context.sample_rate);
        graph.nodes.noise.gain().ramp_to(target, frames);
        self.ducked = enable;
        log::debug!("Noise {} -> {:.3} over {} frames", if enable { "ducked" } else { "restored" }, target, frames);
    }

    pub fn is_ducked(&self) -> bool {
        self.ducked
    }

    /// Set the nominal noise level immediately. Clamped to [0, 1]. While
    /// ducked only the nominal level changes; it takes effect on un-duck.
    pub fn set_volume(&mut self, level: f32) {
        self.volume = level.clamp(0.0, 1.0);
        if self.ducked {
            return;
        }
        if let GraphState::Running(graph) = &self.state {
            graph.nodes.noise.set_volume(self.volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    fn running(&self) -> Option<&RunningGraph> {
        match &self.state {
            GraphState::Running(graph) => Some(graph),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&AudioContext> {
        self.running().map(|g| &g.context)
    }

    pub fn topology(&self) -> Option<&GraphTopology> {
        self.running().map(|g| &g.topology)
    }

    pub fn analysis_tap(&self) -> Option<AnalysisTap> {
        self.running().map(|g| g.nodes.tap.clone())
    }

    pub fn master_output(&self) -> Option<MasterOutput> {
        self.running().map(|g| g.nodes.output.clone())
    }

    pub fn noise_gain(&self) -> Option<&Gain> {
        self.running().map(|g| g.nodes.noise.gain())
    }

    pub fn master_gain(&self) -> Option<&Gain> {
        self.running().map(|g| &g.nodes.master)
    }
}

impl Drop for GraphManager {
    fn drop(&mut self) {
        self.stop_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::NullBackend;
    use std::time::Duration;

    struct RefusingBackend;

    impl AudioBackend for RefusingBackend {
        fn name(&self) -> &str {
            "refusing"
        }

        fn activate(&self, _params: &StreamParams) -> Result<Box<dyn AudioSink>> {
            anyhow::bail!("user gesture required")
        }
    }

    fn test_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 8000,
            period_size: 128,
            fft_size: 256,
            noise_seed: Some(42),
            ..AudioConfig::default()
        }
    }

    fn manager() -> GraphManager {
        GraphManager::new(test_config(), Box::new(NullBackend))
    }

    #[test]
    fn initialize_is_idempotent_and_suspended() {
        let mut graph = manager();
        assert_eq!(graph.phase(), GraphPhase::Uninitialized);
        let first = graph.initialize().id();
        assert_eq!(graph.initialize().id(), first);
        assert_eq!(graph.initialize().state(), ContextState::Suspended);
        assert_eq!(graph.phase(), GraphPhase::Idle);
        assert!(graph.context().is_none());
    }

    #[test]
    fn start_and_stop_lifecycle() {
        let mut graph = manager();
        graph.start_session().unwrap();
        assert_eq!(graph.phase(), GraphPhase::Running);
        assert_eq!(graph.context().unwrap().state(), ContextState::Running);
        assert!(graph.analysis_tap().is_some());
        assert!(graph.master_output().is_some());

        // Second start keeps the same context
        let id = graph.context().unwrap().id();
        graph.start_session().unwrap();
        assert_eq!(graph.context().unwrap().id(), id);

        graph.stop_session();
        assert_eq!(graph.phase(), GraphPhase::Stopped);
        assert!(graph.context().is_none());
        assert!(graph.analysis_tap().is_none());
        assert!(graph.master_output().is_none());

        graph.stop_session();
        assert_eq!(graph.phase(), GraphPhase::Stopped);
    }

    #[test]
    fn stop_before_start_is_noop() {
        let mut graph = manager();
        graph.stop_session();
        assert_eq!(graph.phase(), GraphPhase::Uninitialized);
    }

    #[test]
    fn refused_activation_stays_idle() {
        let mut graph = GraphManager::new(test_config(), Box::new(RefusingBackend));
        let err = graph.start_session().unwrap_err();
        assert!(err.reason.contains("user gesture"));
        assert_eq!(graph.phase(), GraphPhase::Idle);
        assert!(graph.context().is_none());
    }

    #[test]
    fn restart_builds_a_fresh_graph() {
        let mut graph = manager();
        let mut seen = Vec::new();
        for _ in 0..2 {
            graph.start_session().unwrap();
            let topology = graph.topology().unwrap();
            assert_eq!(topology.nodes.len(), 8);
            seen.push(topology.context_id);
            graph.stop_session();
            assert!(graph.topology().is_none());
        }
        assert_ne!(seen[0], seen[1]);
    }

    #[test]
    fn topology_routes_everything_to_destination() {
        let mut graph = manager();
        graph.start_session().unwrap();
        let topology = graph.topology().unwrap();
        for node in &topology.nodes {
            if *node != NodeKind::Analyser {
                assert!(topology.reaches(*node, NodeKind::Destination), "{:?}", node);
            }
        }
        assert!(topology.is_connected(NodeKind::MasterGain, NodeKind::Analyser));
        assert!(topology.is_connected(NodeKind::VoiceBus, NodeKind::MasterGain));
        assert!(!topology.is_connected(NodeKind::VoiceBus, NodeKind::NoiseGain));
    }

    #[test]
    fn ducking_ramps_and_restores() {
        let mut graph = manager();
        graph.start_session().unwrap();

        graph.duck_noise(true);
        let gain = graph.noise_gain().unwrap();
        assert_eq!(gain.target(), 0.08);
        assert_eq!(gain.ramp_frames(), 800);

        graph.duck_noise(false);
        let gain = graph.noise_gain().unwrap();
        assert_eq!(gain.target(), 0.3);
        assert!(gain.ramp_frames() > 0);
        assert!(!graph.is_ducked());
    }

    #[test]
    fn set_volume_clamps_and_applies() {
        let mut graph = manager();
        for (v, expected) in [(-2.0, 0.0), (0.6, 0.6), (1.5, 1.0)] {
            graph.set_volume(v);
            assert_eq!(graph.volume(), expected);
        }
        graph.start_session().unwrap();
        assert_eq!(graph.noise_gain().unwrap().target(), 1.0);
        graph.set_volume(0.25);
        assert_eq!(graph.noise_gain().unwrap().target(), 0.25);
        assert_eq!(graph.noise_gain().unwrap().ramp_frames(), 0);
    }

    #[test]
    fn volume_change_while_ducked_waits_for_restore() {
        let mut graph = manager();
        graph.start_session().unwrap();
        graph.duck_noise(true);

        graph.set_volume(0.9);
        assert_eq!(graph.volume(), 0.9);
        let gain = graph.noise_gain().unwrap();
        assert_eq!(gain.target(), 0.08);
        assert_eq!(gain.ramp_frames(), 800);
        assert!(graph.is_ducked());

        graph.duck_noise(false);
        let gain = graph.noise_gain().unwrap();
        assert_eq!(gain.target(), 0.9);
        assert_eq!(gain.ramp_frames(), 800);
    }

    #[test]
    fn analysis_tap_sees_the_noise_bed() {
        let mut graph = manager();
        graph.start_session().unwrap();
        let tap = graph.analysis_tap().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(tap.level() > 0.0);
        graph.stop_session();
    }

    #[test]
    fn voice_is_mixed_over_the_bed() {
        let config = test_config();
        let context = AudioContext::new(&config);
        let (mut renderer, nodes, _) = build_graph(&config, &context, 0.0);
        nodes.master.set(1.0);

        let voice = VoiceSource::new(vec![0.5; 2 * 64]);
        voice.start(&nodes.output).unwrap();

        let mut out = vec![0.0; 2 * 128];
        renderer.render(&mut out);
        assert!(out[..128].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(out[128..].iter().all(|&s| s == 0.0));
        assert!(renderer.voices.is_empty());
    }

    #[test]
    fn voices_cannot_start_after_teardown() {
        let mut graph = manager();
        graph.start_session().unwrap();
        let output = graph.master_output().unwrap();
        graph.stop_session();
        assert!(VoiceSource::new(vec![0.0; 4]).start(&output).is_err());
    }
}
