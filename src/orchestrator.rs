//! Session orchestrator: the turn state machine
//! `Active -> Processing -> (Responding ->) Active`, plus session start/stop.
//!
//! All collaborators are injected. The session and graph locks are plain
//! std mutexes and are never held across an await; turns detect that the
//! session was stopped underneath them by comparing epochs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio::{
    AnalysisTap, AudioActivationError, EffectsChain, GraphManager, GraphPhase, VoiceDecoder,
    VoiceSource, silent_buffer,
};
use crate::config::Config;
use crate::generator::{SpeechFallback, TextGenerator, VoiceSynthesizer, fallback_line};
use crate::presence::PresenceGate;
use crate::session::{Session, SessionState, Speaker, TranscriptEntry};

/// Transcript text appended when the gate stays closed.
pub const NO_PRESENCE_TEXT: &str = "No presence detected...";

/// Length of the silence substituted for undecodable or missing voice audio.
const SILENT_FALLBACK_SECS: f64 = 2.0;

/// Source of finalized utterances that can be paused while a turn runs.
pub trait InputCapture: Send + Sync {
    fn resume(&self);
    fn pause(&self);
}

#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Extra wait after the voice's effective duration
    pub settle_margin: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            settle_margin: Duration::from_millis(500),
        }
    }
}

impl From<&Config> for TurnConfig {
    fn from(config: &Config) -> Self {
        Self {
            settle_margin: Duration::from_millis(config.session_settle_margin_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    TranscriptAppended(TranscriptEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Not accepted: session not Active or empty input
    Ignored,
    NoPresence,
    Responded,
    /// Failed mid-turn; state restored without a response entry
    Dropped,
    /// The session was stopped or restarted while the turn was in flight
    Abandoned,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub transcript: Vec<TranscriptEntry>,
    pub last_reading: Option<f64>,
    pub debug_override: bool,
    pub volume: f32,
    pub graph: GraphPhase,
}

/// Everything the orchestrator talks to.
pub struct Collaborators {
    pub gate: PresenceGate,
    pub text: Arc<dyn TextGenerator>,
    pub voice: Arc<dyn VoiceSynthesizer>,
    pub decoder: Arc<dyn VoiceDecoder>,
    pub input: Arc<dyn InputCapture>,
    pub effects: EffectsChain,
    pub speech: SpeechFallback,
}

struct Shared {
    session: Mutex<Session>,
    graph: Mutex<GraphManager>,
    gate: PresenceGate,
    text: Arc<dyn TextGenerator>,
    voice: Arc<dyn VoiceSynthesizer>,
    decoder: Arc<dyn VoiceDecoder>,
    input: Arc<dyn InputCapture>,
    effects: EffectsChain,
    speech: SpeechFallback,
    turn: TurnConfig,
    events: mpsc::Sender<SessionEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap-to-clone handle; every clone drives the same session.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        graph: GraphManager,
        collaborators: Collaborators,
        turn: TurnConfig,
        debug_override: bool,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let Collaborators {
            gate,
            text,
            voice,
            decoder,
            input,
            effects,
            speech,
        } = collaborators;
        input.pause();
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session::new(debug_override)),
                graph: Mutex::new(graph),
                gate,
                text,
                voice,
                decoder,
                input,
                effects,
                speech,
                turn,
                events,
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.shared.session)
    }

    fn graph(&self) -> MutexGuard<'_, GraphManager> {
        lock(&self.shared.graph)
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.shared.events.try_send(event) {
            log::debug!("Session event not delivered: {}", e);
        }
    }

    /// Start a session. The audio graph comes up first; if the host refuses
    /// activation the session stays Inactive.
    pub fn start(&self) -> Result<(), AudioActivationError> {
        if self.state() != SessionState::Inactive {
            log::debug!("Session already started");
            return Ok(());
        }
        self.graph().start_session()?;
        {
            let mut session = self.session();
            session.reset();
            session.state = SessionState::Active;
        }
        log::info!("Session started");
        self.emit(SessionEvent::StateChanged(SessionState::Active));
        self.shared.input.resume();
        Ok(())
    }

    /// Stop from any state. In-flight turns are abandoned.
    pub fn stop(&self) {
        self.shared.input.pause();
        self.graph().stop_session();
        let was = {
            let mut session = self.session();
            let was = session.state;
            session.reset();
            session.state = SessionState::Inactive;
            was
        };
        if was != SessionState::Inactive {
            log::info!("Session stopped (was {:?})", was);
            self.emit(SessionEvent::StateChanged(SessionState::Inactive));
        }
    }

    /// Run one turn for a finalized utterance. Only accepted while Active,
    /// so at most one turn is ever in flight.
    pub async fn submit_input(&self, text: &str) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Ignored;
        }

        let (epoch, debug_override, entry) = {
            let mut session = self.session();
            if session.state != SessionState::Active {
                log::debug!("Input ignored in state {:?}", session.state);
                return TurnOutcome::Ignored;
            }
            let entry = session.append(Speaker::Input, text, None);
            session.state = SessionState::Processing;
            (session.epoch(), session.debug_override, entry)
        };
        self.shared.input.pause();
        log::info!("Input: {}", text);
        self.emit(SessionEvent::TranscriptAppended(entry));
        self.emit(SessionEvent::StateChanged(SessionState::Processing));

        match self.run_turn(epoch, text, debug_override).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Turn failed: {:#}", e);
                self.recover(epoch)
            }
        }
    }

    async fn run_turn(&self, epoch: u64, text: &str, debug_override: bool) -> Result<TurnOutcome> {
        let decision = self.shared.gate.check(debug_override).await;
        let value = decision.reading.value;
        {
            let mut session = self.session();
            if session.epoch() != epoch {
                return Ok(TurnOutcome::Abandoned);
            }
            session.last_reading = Some(value);
        }

        if !decision.respond {
            return Ok(if self.complete(epoch, NO_PRESENCE_TEXT, value, false) {
                TurnOutcome::NoPresence
            } else {
                TurnOutcome::Abandoned
            });
        }

        if !self.transition(epoch, SessionState::Responding) {
            return Ok(TurnOutcome::Abandoned);
        }
        self.graph().duck_noise(true);

        let reply = match self.shared.text.generate(text, value).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Text generation failed: {:#}, using a fallback line", e);
                fallback_line().to_string()
            }
        };
        if self.is_stale(epoch) {
            return Ok(TurnOutcome::Abandoned);
        }

        let audio = match self.shared.voice.synthesize(&reply).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Voice synthesis failed: {:#}, playing silence", e);
                if self.shared.speech.is_enabled() {
                    if let Err(e) = self.shared.speech.speak(&reply) {
                        log::warn!("Speech fallback failed: {:#}", e);
                    }
                }
                None
            }
        };
        if self.is_stale(epoch) {
            return Ok(TurnOutcome::Abandoned);
        }

        let sample_rate = self
            .graph()
            .context()
            .map(|c| c.sample_rate())
            .context("audio graph is not running")?;
        let decoder = self.shared.decoder.clone();
        let effects = self.shared.effects.clone();
        let (source, duration) = tokio::task::spawn_blocking(move || {
            render_voice(decoder.as_ref(), &effects, audio, sample_rate)
        })
        .await
        .context("voice render task failed")?;

        // Checked after taking the output: a restart bumps the epoch before
        // the new graph exists, so a fresh epoch means the output is ours.
        let output = self.graph().master_output();
        if self.is_stale(epoch) {
            return Ok(TurnOutcome::Abandoned);
        }
        let output = output.context("audio graph is not running")?;
        source.start(&output)?;
        log::info!("Voice playing for {:.2}s: {}", duration, reply);

        tokio::time::sleep(Duration::from_secs_f64(duration) + self.shared.turn.settle_margin).await;

        Ok(if self.complete(epoch, &reply, value, true) {
            TurnOutcome::Responded
        } else {
            TurnOutcome::Abandoned
        })
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.session().epoch() != epoch
    }

    fn transition(&self, epoch: u64, state: SessionState) -> bool {
        {
            let mut session = self.session();
            if session.epoch() != epoch {
                return false;
            }
            session.state = state;
        }
        self.emit(SessionEvent::StateChanged(state));
        true
    }

    /// Append the voice-side entry and return to Active. False if the turn
    /// went stale.
    fn complete(&self, epoch: u64, text: &str, reading: f64, unduck: bool) -> bool {
        if self.is_stale(epoch) {
            return false;
        }
        if unduck {
            self.graph().duck_noise(false);
        }
        let entry = {
            let mut session = self.session();
            if session.epoch() != epoch {
                return false;
            }
            let entry = session.append(Speaker::Voice, text, Some(reading));
            session.state = SessionState::Active;
            entry
        };
        self.emit(SessionEvent::TranscriptAppended(entry));
        self.emit(SessionEvent::StateChanged(SessionState::Active));
        self.shared.input.resume();
        true
    }

    /// Turn-boundary recovery: un-duck and return to Active, no entry.
    fn recover(&self, epoch: u64) -> TurnOutcome {
        if self.is_stale(epoch) {
            return TurnOutcome::Abandoned;
        }
        self.graph().duck_noise(false);
        if !self.transition(epoch, SessionState::Active) {
            return TurnOutcome::Abandoned;
        }
        self.shared.input.resume();
        TurnOutcome::Dropped
    }

    pub fn set_debug_override(&self, enabled: bool) {
        self.session().debug_override = enabled;
        log::info!("Debug override {}", if enabled { "on" } else { "off" });
    }

    pub fn set_volume(&self, level: f32) {
        self.graph().set_volume(level);
    }

    pub fn state(&self) -> SessionState {
        self.session().state
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.session().transcript().to_vec()
    }

    pub fn analysis_tap(&self) -> Option<AnalysisTap> {
        self.graph().analysis_tap()
    }

    pub fn is_ducked(&self) -> bool {
        self.graph().is_ducked()
    }

    pub fn context_id(&self) -> Option<uuid::Uuid> {
        self.graph().context().map(|c| c.id())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (volume, graph) = {
            let graph = self.graph();
            (graph.volume(), graph.phase())
        };
        let session = self.session();
        SessionSnapshot {
            state: session.state,
            transcript: session.transcript().to_vec(),
            last_reading: session.last_reading,
            debug_override: session.debug_override,
            volume,
            graph,
        }
    }
}

/// Decode and process the voice off the async runtime. Missing or
/// undecodable audio becomes silence routed without effects.
fn render_voice(
    decoder: &dyn VoiceDecoder,
    effects: &EffectsChain,
    audio: Option<Bytes>,
    sample_rate: u32,
) -> (VoiceSource, f64) {
    let decoded = audio.map(|bytes| decoder.decode(&bytes, sample_rate));
    match decoded {
        Some(Ok(buffer)) => effects.apply(&buffer, sample_rate),
        Some(Err(e)) => {
            log::warn!("Voice decode failed: {:#}, substituting silence", e);
            EffectsChain::bypass(&silent_buffer(SILENT_FALLBACK_SECS, sample_rate))
        }
        None => EffectsChain::bypass(&silent_buffer(SILENT_FALLBACK_SECS, sample_rate)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{AudioBackend, AudioSink, NullBackend, StreamParams};
    use crate::audio::decoder::VoiceBuffer;
    use crate::audio::{AudioConfig, EffectsConfig, WavDecoder};
    use crate::generator::FALLBACK_LINES;
    use crate::presence::tests::FixedSource;
    use crate::presence::GateConfig;
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct RefusingBackend;

    impl AudioBackend for RefusingBackend {
        fn name(&self) -> &str {
            "refusing"
        }

        fn activate(&self, _params: &StreamParams) -> Result<Box<dyn AudioSink>> {
            anyhow::bail!("no user gesture")
        }
    }

    #[derive(Default)]
    struct FakeInput {
        listening: AtomicBool,
    }

    impl InputCapture for FakeInput {
        fn resume(&self) {
            self.listening.store(true, Ordering::SeqCst);
        }

        fn pause(&self) {
            self.listening.store(false, Ordering::SeqCst);
        }
    }

    struct FakeText {
        reply: Option<&'static str>,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for FakeText {
        async fn generate(&self, _input: &str, _context_scalar: f64) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.reply {
                Some(r) => Ok(r.to_string()),
                None => anyhow::bail!("generator down"),
            }
        }
    }

    struct FakeVoice {
        ok: bool,
    }

    #[async_trait]
    impl VoiceSynthesizer for FakeVoice {
        async fn synthesize(&self, _text: &str) -> Result<Bytes> {
            if !self.ok {
                anyhow::bail!("synthesizer down");
            }
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut cursor = Cursor::new(Vec::new());
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
                for i in 0..4000 {
                    writer.write_sample(((i % 40) as i16 - 20) * 500)?;
                }
                writer.finalize()?;
            }
            Ok(Bytes::from(cursor.into_inner()))
        }
    }

    /// Blocks inside `decode` until released, then returns a loud tone.
    struct GatedDecoder {
        entered: Arc<tokio::sync::Notify>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl VoiceDecoder for GatedDecoder {
        fn decode(&self, _data: &[u8], target_rate: u32) -> Result<VoiceBuffer> {
            self.entered.notify_one();
            lock(&self.release).recv()?;
            Ok(VoiceBuffer {
                samples: vec![0.5; target_rate as usize / 2],
                sample_rate: target_rate,
            })
        }
    }

    struct PanickingDecoder;

    impl VoiceDecoder for PanickingDecoder {
        fn decode(&self, _data: &[u8], _target_rate: u32) -> Result<VoiceBuffer> {
            panic!("decoder blew up")
        }
    }

    /// Null backend that remembers the loudest sample written per activation.
    #[derive(Clone, Default)]
    struct PeakBackend {
        peaks: Arc<Mutex<Vec<f32>>>,
    }

    struct PeakSink {
        inner: Box<dyn AudioSink>,
        peaks: Arc<Mutex<Vec<f32>>>,
        index: usize,
    }

    impl AudioBackend for PeakBackend {
        fn name(&self) -> &str {
            "peak"
        }

        fn activate(&self, params: &StreamParams) -> Result<Box<dyn AudioSink>> {
            let mut peaks = lock(&self.peaks);
            peaks.push(0.0);
            Ok(Box::new(PeakSink {
                inner: NullBackend.activate(params)?,
                peaks: self.peaks.clone(),
                index: peaks.len() - 1,
            }))
        }
    }

    impl AudioSink for PeakSink {
        fn params(&self) -> &StreamParams {
            self.inner.params()
        }

        fn write(&mut self, interleaved: &[f32]) -> Result<()> {
            let peak = interleaved.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            {
                let mut peaks = lock(&self.peaks);
                peaks[self.index] = peaks[self.index].max(peak);
            }
            self.inner.write(interleaved)
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        input: Arc<FakeInput>,
        text: Arc<FakeText>,
        _events: mpsc::Receiver<SessionEvent>,
    }

    struct Setup {
        reading: Option<f64>,
        reply: Option<&'static str>,
        voice_ok: bool,
        text_delay: Duration,
        refuse_audio: bool,
        backend: Option<Box<dyn AudioBackend>>,
        decoder: Option<Arc<dyn VoiceDecoder>>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                reading: Some(0.9),
                reply: Some("...who is there..."),
                voice_ok: true,
                text_delay: Duration::ZERO,
                refuse_audio: false,
                backend: None,
                decoder: None,
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let audio = AudioConfig {
            sample_rate: 8000,
            period_size: 256,
            fft_size: 256,
            noise_seed: Some(7),
            ..AudioConfig::default()
        };
        let backend: Box<dyn AudioBackend> = match setup.backend {
            Some(backend) => backend,
            None if setup.refuse_audio => Box::new(RefusingBackend),
            None => Box::new(NullBackend),
        };
        let input = Arc::new(FakeInput::default());
        let text = Arc::new(FakeText {
            reply: setup.reply,
            delay: setup.text_delay,
            calls: AtomicUsize::new(0),
        });
        let effects = EffectsChain::new(EffectsConfig {
            reverb_decay_secs: 0.1,
            seed: Some(3),
            ..EffectsConfig::default()
        });
        let (tx, rx) = mpsc::channel(100);
        let orchestrator = Orchestrator::new(
            GraphManager::new(audio, backend),
            Collaborators {
                gate: PresenceGate::new(Box::new(FixedSource(setup.reading)), GateConfig::default()),
                text: text.clone(),
                voice: Arc::new(FakeVoice { ok: setup.voice_ok }),
                decoder: setup.decoder.unwrap_or_else(|| Arc::new(WavDecoder)),
                input: input.clone(),
                effects,
                speech: SpeechFallback::new(""),
            },
            TurnConfig::default(),
            false,
            tx,
        );
        Harness {
            orchestrator,
            input,
            text,
            _events: rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn input_is_ignored_until_started() {
        let h = harness(Setup::default());
        assert_eq!(h.orchestrator.submit_input("hello").await, TurnOutcome::Ignored);
        assert!(h.orchestrator.transcript().is_empty());
        assert!(!h.input.listening.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_activation_stays_inactive() {
        let h = harness(Setup {
            refuse_audio: true,
            ..Setup::default()
        });
        assert!(h.orchestrator.start().is_err());
        assert_eq!(h.orchestrator.state(), SessionState::Inactive);
        assert!(h.orchestrator.context_id().is_none());
        assert!(!h.input.listening.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_gate_appends_stock_message() {
        let h = harness(Setup {
            reading: Some(0.3),
            ..Setup::default()
        });
        h.orchestrator.start().unwrap();
        assert_eq!(h.orchestrator.submit_input("anyone?").await, TurnOutcome::NoPresence);

        let transcript = h.orchestrator.transcript();
        let stock: Vec<_> = transcript.iter().filter(|e| e.text == NO_PRESENCE_TEXT).collect();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].presence, Some(0.3));
        assert_eq!(h.text.calls.load(Ordering::SeqCst), 0);
        assert!(!h.orchestrator.is_ducked());
        assert_eq!(h.orchestrator.state(), SessionState::Active);
        assert!(h.input.listening.load(Ordering::SeqCst));
        h.orchestrator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn debug_override_forces_a_response() {
        let h = harness(Setup {
            reading: Some(0.0),
            ..Setup::default()
        });
        h.orchestrator.set_debug_override(true);
        h.orchestrator.start().unwrap();
        assert_eq!(h.orchestrator.submit_input("speak").await, TurnOutcome::Responded);

        let transcript = h.orchestrator.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].speaker, Speaker::Input);
        assert_eq!(transcript[1].speaker, Speaker::Voice);
        assert_eq!(transcript[1].text, "...who is there...");
        assert_eq!(transcript[1].presence, Some(0.85));
        assert_eq!(h.orchestrator.snapshot().last_reading, Some(0.85));
        h.orchestrator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn collaborator_failures_still_complete_the_turn() {
        let h = harness(Setup {
            reply: None,
            voice_ok: false,
            ..Setup::default()
        });
        h.orchestrator.start().unwrap();
        assert_eq!(h.orchestrator.submit_input("hello?").await, TurnOutcome::Responded);

        let transcript = h.orchestrator.transcript();
        let last = transcript.last().unwrap();
        assert_eq!(last.speaker, Speaker::Voice);
        assert!(FALLBACK_LINES.contains(&last.text.as_str()));
        assert!(!h.orchestrator.is_ducked());
        assert_eq!(h.orchestrator.state(), SessionState::Active);
        h.orchestrator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn turns_never_overlap() {
        let h = harness(Setup {
            text_delay: Duration::from_secs(5),
            ..Setup::default()
        });
        h.orchestrator.start().unwrap();

        let first = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.submit_input("first").await })
        };
        while h.orchestrator.state() != SessionState::Responding {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.orchestrator.is_ducked());
        assert!(!h.input.listening.load(Ordering::SeqCst));
        assert_eq!(h.orchestrator.submit_input("second").await, TurnOutcome::Ignored);

        assert_eq!(first.await.unwrap(), TurnOutcome::Responded);
        let transcript = h.orchestrator.transcript();
        assert_eq!(transcript.len(), 2);
        assert!(transcript.iter().all(|e| e.text != "second"));
        assert_eq!(h.text.calls.load(Ordering::SeqCst), 1);
        h.orchestrator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_responding_tears_down() {
        let h = harness(Setup {
            text_delay: Duration::from_secs(5),
            ..Setup::default()
        });
        h.orchestrator.start().unwrap();

        let turn = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.submit_input("hello").await })
        };
        while h.orchestrator.state() != SessionState::Responding {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.orchestrator.stop();
        assert_eq!(h.orchestrator.state(), SessionState::Inactive);
        assert!(h.orchestrator.context_id().is_none());

        assert_eq!(turn.await.unwrap(), TurnOutcome::Abandoned);
        assert!(h.orchestrator.transcript().is_empty());
        assert_eq!(h.orchestrator.state(), SessionState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn render_failure_drops_the_turn_and_restores() {
        let h = harness(Setup {
            decoder: Some(Arc::new(PanickingDecoder)),
            ..Setup::default()
        });
        h.orchestrator.start().unwrap();
        assert_eq!(h.orchestrator.submit_input("hello").await, TurnOutcome::Dropped);

        assert!(!h.orchestrator.is_ducked());
        assert_eq!(h.orchestrator.state(), SessionState::Active);
        assert!(h.input.listening.load(Ordering::SeqCst));
        let transcript = h.orchestrator.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].speaker, Speaker::Input);

        // The session keeps working afterwards
        assert_eq!(h.orchestrator.submit_input("again").await, TurnOutcome::Dropped);
        h.orchestrator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn voice_from_a_previous_session_is_never_played() {
        let backend = PeakBackend::default();
        let peaks = backend.peaks.clone();
        let entered = Arc::new(tokio::sync::Notify::new());
        let (release, gate) = std::sync::mpsc::channel();
        let h = harness(Setup {
            backend: Some(Box::new(backend)),
            decoder: Some(Arc::new(GatedDecoder {
                entered: entered.clone(),
                release: Mutex::new(gate),
            })),
            ..Setup::default()
        });
        h.orchestrator.set_volume(0.0);
        h.orchestrator.start().unwrap();

        let turn = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.submit_input("hello").await })
        };
        entered.notified().await;

        h.orchestrator.stop();
        h.orchestrator.start().unwrap();
        release.send(()).unwrap();
        assert_eq!(turn.await.unwrap(), TurnOutcome::Abandoned);

        // Give the render thread time to play anything it was handed
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert_eq!(lock(&peaks).len(), 2);
        assert_eq!(lock(&peaks)[1], 0.0);
        assert!(h.orchestrator.transcript().is_empty());
        assert_eq!(h.orchestrator.state(), SessionState::Active);
        h.orchestrator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn restart_gives_fresh_session_and_graph() {
        let h = harness(Setup {
            reading: Some(0.1),
            ..Setup::default()
        });
        let mut contexts = Vec::new();
        for _ in 0..3 {
            h.orchestrator.start().unwrap();
            assert!(h.orchestrator.transcript().is_empty());
            contexts.push(h.orchestrator.context_id().unwrap());
            h.orchestrator.submit_input("ping").await;
            assert_eq!(h.orchestrator.transcript().len(), 2);
            h.orchestrator.stop();
            assert!(h.orchestrator.context_id().is_none());
        }
        contexts.dedup();
        assert_eq!(contexts.len(), 3);
    }

    #[test]
    fn undecodable_audio_becomes_two_seconds_of_silence() {
        let effects = EffectsChain::new(EffectsConfig::default());
        let (source, duration) = render_voice(
            &WavDecoder,
            &effects,
            Some(Bytes::from_static(b"not a wav")),
            8000,
        );
        assert_eq!(duration, 2.0);
        assert!(source.frames().iter().all(|&s| s == 0.0));
    }
}
