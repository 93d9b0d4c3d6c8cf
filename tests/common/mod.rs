// Fake collaborators shared by the integration tests

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use luna_practice::audio::{AudioBackend, AudioBackendConfig, AudioFrame, MicrophoneFactory, MicrophoneRelay};
use luna_practice::conversation::{ConnectionStatus, ConversationConfig, ConversationSession};
use luna_practice::game::{GameServices, GameSettings, TranslationGame};
use luna_practice::records::{
    LearningSession, MemoryStore, NewSession, RecordStore, SessionLedger, SessionPatch,
    StreakTracker, UserProgress,
};
use luna_practice::services::{
    AudioPayload, ContentGenerator, ConversationHandle, ConversationProvisioner, Difficulty,
    Evaluator, GeneratedSentence, ScenarioContext, SpeechSynthesizer, Transcriber, Verdict,
};
use luna_practice::transport::{
    FallbackSink, MediaHandle, PlaybackSink, QualityLayer, RealtimeTransport, SendPreset,
    SinkError, TrackInfo, TrackKind, TransportEvent, VideoStats,
};
use luna_practice::{ManualClock, UserContext};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const USER_ID: &str = "user-1";

pub fn user() -> UserContext {
    UserContext::new(USER_ID, "Ana")
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Poll `check` until it holds, failing after roughly two seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("Timed out waiting for: {}", what);
}

// ============================================================================
// Record store
// ============================================================================

/// Memory store that counts writes and can be told to fail
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub fail_create: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecordStore for CountingStore {
    async fn create_session(&self, new: NewSession) -> Result<LearningSession> {
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("store offline");
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_session(new).await
    }

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<LearningSession> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_session(id, patch).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<LearningSession>> {
        self.inner.get_session(id).await
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<LearningSession>> {
        self.inner.list_sessions(user_id).await
    }

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>> {
        self.inner.get_progress(user_id).await
    }

    async fn save_progress(&self, progress: UserProgress) -> Result<UserProgress> {
        self.inner.save_progress(progress).await
    }
}

pub fn ledger_for(store: &Arc<CountingStore>) -> SessionLedger {
    let store: Arc<dyn RecordStore> = store.clone();
    let tracker = Arc::new(StreakTracker::new(store.clone()));
    SessionLedger::new(store, tracker)
}

// ============================================================================
// Conversation collaborators
// ============================================================================

#[derive(Default)]
pub struct FakeProvisioner {
    pub created: AtomicUsize,
    pub ended: Mutex<Vec<String>>,
    pub fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeProvisioner {
    /// Hold `create_conversation` until the returned notify is signalled
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn ended(&self) -> Vec<String> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ConversationProvisioner for FakeProvisioner {
    async fn create_conversation(&self, context: &ScenarioContext) -> Result<ConversationHandle> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("avatar service returned 500");
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ConversationHandle {
            room_url: format!("https://rooms.test/{}", context.room_name),
            conversation_id: format!("conv-{}", n),
        })
    }

    async fn end_conversation(&self, conversation_id: &str) -> Result<()> {
        self.ended.lock().unwrap().push(conversation_id.to_string());
        Ok(())
    }
}

/// Transport and playback sink that record every command
#[derive(Default)]
pub struct FakeTransport {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
    pub destroys: AtomicUsize,
    pub fail_join: AtomicBool,
    pub receive_layers: Mutex<Vec<QualityLayer>>,
    pub send_presets: Mutex<Vec<SendPreset>>,
    stats: Mutex<Option<VideoStats>>,
    pub attached: Mutex<Vec<(String, TrackKind, String)>>,
    blocked_once: Mutex<HashSet<String>>,
    pub fallbacks: Mutex<Vec<FallbackSink>>,
    pub fallbacks_created: AtomicUsize,
}

impl FakeTransport {
    pub async fn emit(&self, event: TransportEvent) -> Result<()> {
        let sender = self.events.lock().unwrap().clone();
        let sender = sender.ok_or_else(|| anyhow!("nobody subscribed"))?;
        sender.send(event).await.map_err(|_| anyhow!("subscriber gone"))
    }

    pub fn is_subscribed(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    pub fn block_autoplay_once(&self, media_id: &str) {
        self.blocked_once.lock().unwrap().insert(media_id.to_string());
    }

    pub fn set_stats(&self, width: u32, height: u32) {
        *self.stats.lock().unwrap() = Some(VideoStats {
            width,
            height,
            bitrate_kbps: 1200,
        });
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().unwrap().len()
    }

    pub fn active_fallbacks(&self) -> usize {
        self.fallbacks.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for FakeTransport {
    fn subscribe(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(32);
        *self.events.lock().unwrap() = Some(tx);
        rx
    }

    fn unsubscribe(&self) {
        self.events.lock().unwrap().take();
    }

    async fn join(&self, _room_url: &str, _display_name: &str) -> Result<()> {
        if self.fail_join.load(Ordering::SeqCst) {
            bail!("room not found");
        }
        self.joins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_local_audio(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn set_local_video(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn update_receive_quality(&self, layer: QualityLayer) -> Result<()> {
        self.receive_layers.lock().unwrap().push(layer);
        Ok(())
    }

    async fn update_send_quality(&self, preset: SendPreset) -> Result<()> {
        self.send_presets.lock().unwrap().push(preset);
        Ok(())
    }

    async fn received_video_stats(&self) -> Result<Option<VideoStats>> {
        Ok(*self.stats.lock().unwrap())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[async_trait::async_trait]
impl PlaybackSink for FakeTransport {
    async fn attach(
        &self,
        participant_id: &str,
        track: &TrackInfo,
        media: &MediaHandle,
    ) -> Result<(), SinkError> {
        if self.blocked_once.lock().unwrap().remove(&media.id) {
            return Err(SinkError::AutoplayBlocked);
        }
        self.attached
            .lock()
            .unwrap()
            .push((participant_id.to_string(), track.kind, media.id.clone()));
        Ok(())
    }

    async fn attach_fallback(
        &self,
        participant_id: &str,
        media: &MediaHandle,
    ) -> Result<FallbackSink, SinkError> {
        self.fallbacks_created.fetch_add(1, Ordering::SeqCst);
        let sink = FallbackSink {
            id: format!("fallback-{}", media.id),
            participant_id: participant_id.to_string(),
        };
        self.fallbacks.lock().unwrap().push(sink.clone());
        Ok(sink)
    }

    async fn release_fallback(&self, sink: &FallbackSink) -> Result<()> {
        self.fallbacks.lock().unwrap().retain(|s| s != sink);
        Ok(())
    }

    async fn detach_participant(&self, participant_id: &str) {
        self.attached
            .lock()
            .unwrap()
            .retain(|(p, _, _)| p != participant_id);
    }

    async fn set_speaker(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }
}

pub struct ConversationHarness {
    pub session: ConversationSession,
    pub provisioner: Arc<FakeProvisioner>,
    pub transport: Arc<FakeTransport>,
    pub store: Arc<CountingStore>,
    pub clock: Arc<ManualClock>,
}

impl ConversationHarness {
    pub fn new(config: ConversationConfig) -> Self {
        let provisioner = Arc::new(FakeProvisioner::default());
        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(CountingStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 1, 1, 10, 0)));

        let session = ConversationSession::new(
            config,
            user(),
            provisioner.clone(),
            transport.clone(),
            transport.clone(),
            ledger_for(&store),
            clock.clone(),
        );

        Self {
            session,
            provisioner,
            transport,
            store,
            clock,
        }
    }

    /// Start a session and deliver `joined`; returns the placeholder record id
    pub async fn connect(&self) -> Result<String> {
        self.session.start("coffee-shop", "es").await?;
        self.transport
            .emit(TransportEvent::Joined {
                local_session_id: "local".to_string(),
            })
            .await?;

        let session = self.session.clone();
        eventually("session connected", || {
            let session = session.clone();
            async move {
                let snapshot = session.snapshot().await;
                snapshot.status == ConnectionStatus::Connected && snapshot.record_id.is_some()
            }
        })
        .await;

        Ok(self
            .session
            .snapshot()
            .await
            .record_id
            .ok_or_else(|| anyhow!("no record"))?)
    }
}

// ============================================================================
// Game collaborators
// ============================================================================

/// Produces "Sentence N" / "Answer N"
#[derive(Default)]
pub struct ScriptedGenerator {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub avoided: Mutex<Vec<Vec<String>>>,
    pub entered: Notify,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedGenerator {
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate_sentence(
        &self,
        _native_language: &str,
        _target_language: &str,
        _difficulty: Difficulty,
        avoid: &[String],
    ) -> Result<GeneratedSentence> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.avoided.lock().unwrap().push(avoid.to_vec());
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("content service unavailable");
        }
        Ok(GeneratedSentence {
            prompt: format!("Sentence {}", n),
            expected_translation: format!("Answer {}", n),
        })
    }
}

/// Returns queued transcripts in order, then empty text
#[derive(Default)]
pub struct ScriptedTranscriber {
    queue: Mutex<VecDeque<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn will_hear(&self, text: &str) {
        self.queue.lock().unwrap().push_back(text.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: &AudioPayload, _language: &str) -> Result<String> {
        assert_eq!(audio.mime_type, "audio/wav");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.queue.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Exact-match evaluator that can be held mid-call
#[derive(Default)]
pub struct GatedEvaluator {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub entered: Notify,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl GatedEvaluator {
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Evaluator for GatedEvaluator {
    async fn evaluate_translation(
        &self,
        user_text: &str,
        expected_text: &str,
        _native_language: &str,
        _target_language: &str,
    ) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("evaluation timed out");
        }

        let is_correct = user_text == expected_text;
        Ok(Verdict {
            is_correct,
            score: if is_correct { 100 } else { 20 },
            feedback: if is_correct { "Great job!" } else { "Not quite." }.to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakeSynthesizer {
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<AudioPayload> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("tts quota exceeded");
        }
        Ok(AudioPayload {
            bytes: text.as_bytes().to_vec(),
            mime_type: "audio/mpeg".to_string(),
        })
    }
}

/// Microphone that cannot be opened
pub struct DeniedMicrophone;

impl MicrophoneFactory for DeniedMicrophone {
    fn create(&self, _config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        bail!("permission denied")
    }
}

pub fn speech_frame() -> AudioFrame {
    AudioFrame {
        samples: vec![512i16; 1600],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    }
}

pub struct GameHarness {
    pub game: TranslationGame,
    pub generator: Arc<ScriptedGenerator>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub evaluator: Arc<GatedEvaluator>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub microphone: MicrophoneRelay,
    pub store: Arc<CountingStore>,
    pub clock: Arc<ManualClock>,
}

impl GameHarness {
    pub fn new(settings: GameSettings) -> Self {
        Self::with_microphone(settings, None)
    }

    pub fn with_microphone(
        settings: GameSettings,
        microphone_override: Option<Arc<dyn MicrophoneFactory>>,
    ) -> Self {
        let generator = Arc::new(ScriptedGenerator::default());
        let transcriber = Arc::new(ScriptedTranscriber::default());
        let evaluator = Arc::new(GatedEvaluator::default());
        let synthesizer = Arc::new(FakeSynthesizer::default());
        let microphone = MicrophoneRelay::new();
        let store = Arc::new(CountingStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 1, 1, 10, 0)));

        let services = GameServices {
            generator: generator.clone(),
            transcriber: transcriber.clone(),
            evaluator: evaluator.clone(),
            synthesizer: Some(synthesizer.clone()),
            microphone: microphone_override.unwrap_or_else(|| Arc::new(microphone.clone())),
        };

        let game = TranslationGame::new(settings, user(), services, ledger_for(&store), clock.clone());

        Self {
            game,
            generator,
            transcriber,
            evaluator,
            synthesizer,
            microphone,
            store,
            clock,
        }
    }

    /// Record one answer: start capture, speak, stop capture
    pub async fn answer(&self, heard: &str) -> Result<()> {
        self.game.toggle_capture().await?;
        self.microphone.push(speech_frame()).await?;
        self.transcriber.will_hear(heard);
        self.game.toggle_capture().await?;
        Ok(())
    }
}

pub fn quick_settings() -> GameSettings {
    GameSettings {
        native_language: "en".to_string(),
        target_language: "hi".to_string(),
        seconds_per_question: 30,
        speak_prompts: false,
        ..GameSettings::default()
    }
}
