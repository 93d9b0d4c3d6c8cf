use super::config::ConversationConfig;
use super::quality;
use super::scenario::scenario_context;
use super::state::{
    AudioHealth, ConnectionStatus, ConversationSnapshot, EndReason, EnvironmentSignal,
    ObservedQuality, SessionOutcome,
};
use crate::clock::{elapsed_minutes, Clock};
use crate::context::UserContext;
use crate::error::{PracticeError, PracticeResult};
use crate::records::{NewSession, SessionLedger, SessionType};
use crate::services::{ConversationProvisioner, ScenarioContext};
use crate::transport::{
    FallbackSink, MediaHandle, ParticipantInfo, PlaybackSink, QualityLayer, RealtimeTransport,
    SinkError, TrackInfo, TrackKind, TransportEvent, VideoStats,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drives one AI-avatar conversation at a time
///
/// Every way a session can end (end-call, page unload, hidden tab,
/// navigation, teardown, remote leave, transport error) funnels into
/// `finalize`, which is idempotent: the session row is finalized exactly
/// once and a second call finds nothing to clean up.
#[derive(Clone)]
pub struct ConversationSession {
    shared: Arc<Shared>,
}

pub(super) struct Shared {
    config: ConversationConfig,
    user: UserContext,
    provisioner: Arc<dyn ConversationProvisioner>,
    transport: Arc<dyn RealtimeTransport>,
    sink: Arc<dyn PlaybackSink>,
    ledger: SessionLedger,
    clock: Arc<dyn Clock>,
    core: Mutex<Core>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AttachedKey {
    participant_id: String,
    kind: TrackKind,
    media_id: String,
    remote: bool,
}

struct OpenRecord {
    id: String,
    started_at: DateTime<Utc>,
}

/// Everything owned by the current attempt
struct Core {
    status: ConnectionStatus,
    /// Bumped whenever an attempt starts or ends; tags async work
    attempt: u64,
    scenario: Option<String>,
    language: Option<String>,
    room_url: Option<String>,
    conversation_id: Option<String>,
    local_session_id: Option<String>,
    local_audio: bool,
    local_video: bool,
    speaker: bool,
    requested_layer: QualityLayer,
    observed: ObservedQuality,
    audio: AudioHealth,
    participants: HashMap<String, ParticipantInfo>,
    attached: HashSet<AttachedKey>,
    fallbacks: HashMap<String, FallbackSink>,
    started_at: Option<DateTime<Utc>>,
    record: Option<OpenRecord>,
    error: Option<String>,
    event_task: Option<JoinHandle<()>>,
    quality_task: Option<JoinHandle<()>>,
}

impl Core {
    fn new(config: &ConversationConfig, attempt: u64) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt,
            scenario: None,
            language: None,
            room_url: None,
            conversation_id: None,
            local_session_id: None,
            local_audio: true,
            local_video: true,
            speaker: true,
            requested_layer: config.default_quality,
            observed: ObservedQuality::default(),
            audio: AudioHealth::default(),
            participants: HashMap::new(),
            attached: HashSet::new(),
            fallbacks: HashMap::new(),
            started_at: None,
            record: None,
            error: None,
            event_task: None,
            quality_task: None,
        }
    }

    /// Whether there is anything for finalize to do
    fn is_live(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) || self.record.is_some()
            || self.conversation_id.is_some()
            || self.event_task.is_some()
            || self.quality_task.is_some()
            || !self.fallbacks.is_empty()
    }

    fn refresh_audio_health(&mut self) {
        let remote_participants = self.participants.values().filter(|p| !p.local).count();
        let remote_audio_tracks = self
            .attached
            .iter()
            .filter(|k| k.remote && k.kind == TrackKind::Audio)
            .count();

        self.audio = AudioHealth {
            remote_participants,
            remote_audio_tracks,
            fallback_active: !self.fallbacks.is_empty(),
        };
    }
}

impl ConversationSession {
    pub fn new(
        config: ConversationConfig,
        user: UserContext,
        provisioner: Arc<dyn ConversationProvisioner>,
        transport: Arc<dyn RealtimeTransport>,
        sink: Arc<dyn PlaybackSink>,
        ledger: SessionLedger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let core = Core::new(&config, 0);
        Self {
            shared: Arc::new(Shared {
                config,
                user,
                provisioner,
                transport,
                sink,
                ledger,
                clock,
                core: Mutex::new(core),
            }),
        }
    }

    /// Provision a room for `scenario` and join it
    ///
    /// Returns once the join request has been accepted; the session becomes
    /// `Connected` when the transport reports `joined`. Provisioning runs on
    /// a task owned by the session, so a caller that stops waiting leaves an
    /// attempt that still connects, or ends its room if stopped meanwhile.
    pub async fn start(&self, scenario: &str, language: &str) -> PracticeResult<()> {
        let shared = &self.shared;
        let context = scenario_context(scenario, language, &shared.user, shared.clock.now())?;

        let (attempt, connecting) = {
            let mut core = shared.core.lock().await;
            if matches!(
                core.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            ) {
                return Err(PracticeError::invalid_state(
                    "A conversation is already in progress",
                ));
            }

            let attempt = core.attempt + 1;
            *core = Core::new(&shared.config, attempt);
            core.status = ConnectionStatus::Connecting;
            core.scenario = Some(context.scenario.clone());
            core.language = Some(context.language.clone());

            info!(
                "Starting conversation: {} ({}) for {}",
                context.scenario, context.language, shared.user.user_id
            );
            let connecting = tokio::spawn(Arc::clone(shared).connect(attempt, context));
            (attempt, connecting)
        };

        match connecting.await {
            Ok(result) => result,
            Err(e) => {
                error!("Connection task for attempt {} failed: {}", attempt, e);
                Err(shared.fail(attempt, PracticeError::connection(e)).await)
            }
        }
    }

    /// Explicit end-call action
    pub async fn stop(&self) -> Option<SessionOutcome> {
        self.finalize(EndReason::EndCall).await
    }

    /// Adapter for browser lifecycle signals
    pub async fn signal(&self, signal: EnvironmentSignal) -> Option<SessionOutcome> {
        if signal == EnvironmentSignal::VisibilityHidden && !self.shared.config.end_on_hidden {
            debug!("Page hidden; keeping the conversation alive by configuration");
            return None;
        }
        self.finalize(signal.into()).await
    }

    /// The owning view is going away
    pub async fn teardown(&self) -> Option<SessionOutcome> {
        self.signal(EnvironmentSignal::Teardown).await
    }

    /// Release everything and persist the session row; safe to call repeatedly
    pub async fn finalize(&self, reason: EndReason) -> Option<SessionOutcome> {
        self.shared.finalize(reason).await
    }

    pub async fn set_microphone(&self, enabled: bool) -> PracticeResult<()> {
        let mut core = self.shared.core.lock().await;
        require_connected(&core)?;

        self.shared
            .transport
            .set_local_audio(enabled)
            .await
            .map_err(PracticeError::device)?;
        core.local_audio = enabled;
        info!("Microphone {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    pub async fn set_camera(&self, enabled: bool) -> PracticeResult<()> {
        let mut core = self.shared.core.lock().await;
        require_connected(&core)?;

        self.shared
            .transport
            .set_local_video(enabled)
            .await
            .map_err(PracticeError::device)?;
        core.local_video = enabled;
        info!("Camera {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    /// Local output only; remote tracks are never muted
    pub async fn set_speaker(&self, enabled: bool) -> PracticeResult<()> {
        let mut core = self.shared.core.lock().await;
        self.shared
            .sink
            .set_speaker(enabled)
            .await
            .map_err(PracticeError::device)?;
        core.speaker = enabled;
        Ok(())
    }

    /// Record a quality preference and, when connected, request it
    pub async fn set_quality(&self, layer: QualityLayer) -> PracticeResult<()> {
        let mut core = self.shared.core.lock().await;
        core.requested_layer = layer;
        core.observed.verification = Default::default();

        if core.status == ConnectionStatus::Connected {
            self.shared.apply_quality(layer).await?;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> ConversationSnapshot {
        let core = self.shared.core.lock().await;
        let mut participants: Vec<ParticipantInfo> = core.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        ConversationSnapshot {
            status: core.status,
            scenario: core.scenario.clone(),
            language: core.language.clone(),
            room_url: core.room_url.clone(),
            conversation_id: core.conversation_id.clone(),
            local_audio: core.local_audio,
            local_video: core.local_video,
            speaker: core.speaker,
            requested_layer: core.requested_layer,
            observed: core.observed.clone(),
            audio: core.audio,
            participants,
            record_id: core.record.as_ref().map(|r| r.id.clone()),
            started_at: core.started_at,
            error: core.error.clone(),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.shared.core.lock().await.status
    }

    /// Take one quality/audio sample now instead of waiting for the interval
    pub async fn check_quality(&self) {
        let attempt = self.shared.core.lock().await.attempt;
        self.shared.sample_quality(attempt).await;
    }
}

fn require_connected(core: &Core) -> PracticeResult<()> {
    if core.status != ConnectionStatus::Connected {
        return Err(PracticeError::invalid_state("Not connected to a conversation"));
    }
    Ok(())
}

async fn pump_events(weak: Weak<Shared>, attempt: u64, mut events: mpsc::Receiver<TransportEvent>) {
    debug!("Transport event pump started (attempt {})", attempt);

    while let Some(event) = events.recv().await {
        let Some(shared) = weak.upgrade() else {
            break;
        };

        if let Some(reason) = shared.handle_event(attempt, event).await {
            // Finalize aborts this task, so it runs on its own
            tokio::spawn(async move {
                shared.terminate(attempt, reason).await;
            });
            break;
        }
    }

    debug!("Transport event pump stopped (attempt {})", attempt);
}

impl Shared {
    async fn connect(self: Arc<Self>, attempt: u64, context: ScenarioContext) -> PracticeResult<()> {
        let handle = match self.provisioner.create_conversation(&context).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to provision conversation: {:#}", e);
                return Err(self.fail(attempt, PracticeError::provisioning(e)).await);
            }
        };

        {
            let mut core = self.core.lock().await;
            if core.attempt != attempt || core.status != ConnectionStatus::Connecting {
                drop(core);
                warn!(
                    "Conversation {} provisioned after the attempt ended; ending it",
                    handle.conversation_id
                );
                self.end_remote(&handle.conversation_id).await;
                return Err(PracticeError::Cancelled(
                    "Conversation ended while connecting".to_string(),
                ));
            }

            core.room_url = Some(handle.room_url.clone());
            core.conversation_id = Some(handle.conversation_id.clone());

            let events = self.transport.subscribe();
            core.event_task = Some(tokio::spawn(pump_events(
                Arc::downgrade(&self),
                attempt,
                events,
            )));
        }

        if let Err(e) = self
            .transport
            .join(&handle.room_url, &self.user.display_name)
            .await
        {
            error!("Failed to join room {}: {:#}", handle.room_url, e);
            return Err(self.fail(attempt, PracticeError::connection(e)).await);
        }

        if self.core.lock().await.attempt != attempt {
            warn!("Conversation ended while joining; leaving {}", handle.room_url);
            if let Err(e) = self.transport.leave().await {
                warn!("Failed to leave room: {:#}", e);
            }
            return Err(PracticeError::Cancelled(
                "Conversation ended while joining".to_string(),
            ));
        }

        info!("Join requested for {}", handle.room_url);
        Ok(())
    }

    /// Apply one transport event; returns a reason when the event ends the session
    async fn handle_event(self: &Arc<Self>, attempt: u64, event: TransportEvent) -> Option<EndReason> {
        let mut core = self.core.lock().await;
        if core.attempt != attempt {
            debug!("Dropping transport event from a previous attempt");
            return None;
        }

        match event {
            TransportEvent::Joined { local_session_id } => {
                if core.status != ConnectionStatus::Connecting {
                    debug!("Ignoring repeated joined event");
                    return None;
                }
                self.on_joined(&mut core, attempt, local_session_id).await;
                None
            }
            TransportEvent::ParticipantJoined { participant } => {
                if !core.participants.contains_key(&participant.session_id) {
                    info!(
                        "Participant joined: {} ({})",
                        participant.user_name, participant.session_id
                    );
                    core.participants
                        .insert(participant.session_id.clone(), participant);
                    core.refresh_audio_health();
                }
                None
            }
            TransportEvent::ParticipantLeft { session_id } => {
                if core.participants.remove(&session_id).is_some() {
                    info!("Participant left: {}", session_id);
                    core.attached.retain(|k| k.participant_id != session_id);
                    self.sink.detach_participant(&session_id).await;
                    core.refresh_audio_health();
                }
                None
            }
            TransportEvent::TrackStarted { participant, track } => {
                core.participants
                    .entry(participant.session_id.clone())
                    .or_insert_with(|| participant.clone());
                self.attach_track(&mut core, &participant, &track).await;
                core.refresh_audio_health();
                None
            }
            TransportEvent::AutoplayBlocked { participant, track } => {
                if participant.local || track.kind != TrackKind::Audio {
                    return None;
                }
                let Some(media) = track.media.as_ref() else {
                    debug!("Autoplay block from {} without media", participant.session_id);
                    return None;
                };
                warn!(
                    "Client reports autoplay blocked for {}",
                    participant.session_id
                );
                self.start_fallback(&mut core, &participant.session_id, media)
                    .await;
                core.refresh_audio_health();
                None
            }
            TransportEvent::Left => match core.status {
                ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                    Some(EndReason::RemoteLeft)
                }
                _ => None,
            },
            TransportEvent::Error { message } => {
                error!("Transport error: {}", message);
                Some(EndReason::TransportError(message))
            }
        }
    }

    async fn on_joined(self: &Arc<Self>, core: &mut Core, attempt: u64, local_session_id: String) {
        let started_at = self.clock.now();
        core.status = ConnectionStatus::Connected;
        core.local_session_id = Some(local_session_id);
        core.started_at = Some(started_at);

        info!("Connected to conversation room (attempt {})", attempt);

        // The row exists from the first moment so a crash still leaves a record
        let language = core.language.clone().unwrap_or_default();
        let new = NewSession::placeholder(
            &self.user.user_id,
            SessionType::AiConversation,
            language,
            started_at,
        );
        match self.ledger.open(new).await {
            Ok(record) => {
                core.record = Some(OpenRecord {
                    id: record.id,
                    started_at,
                });
            }
            Err(e) => warn!("Conversation continues without a session record: {:#}", e),
        }

        if let Err(e) = self.apply_quality(core.requested_layer).await {
            warn!("Failed to request initial quality: {}", e);
        }

        core.quality_task = Some(tokio::spawn(quality::monitor(
            Arc::downgrade(self),
            attempt,
            self.config.quality_check_interval,
        )));
    }

    async fn attach_track(&self, core: &mut Core, participant: &ParticipantInfo, track: &TrackInfo) {
        // Our own microphone is never played back
        if participant.local && track.kind == TrackKind::Audio {
            return;
        }
        if !track.state.is_attachable() {
            debug!(
                "Track {:?} from {} is {:?}; waiting",
                track.kind, participant.session_id, track.state
            );
            return;
        }
        let Some(media) = track.media.as_ref() else {
            debug!(
                "Track {:?} from {} has no media handle yet; waiting",
                track.kind, participant.session_id
            );
            return;
        };

        let key = AttachedKey {
            participant_id: participant.session_id.clone(),
            kind: track.kind,
            media_id: media.id.clone(),
            remote: !participant.local,
        };
        if core.attached.contains(&key) {
            return;
        }

        match self.sink.attach(&participant.session_id, track, media).await {
            Ok(()) => {
                info!(
                    "Attached {:?} track from {}",
                    track.kind, participant.session_id
                );
                core.attached.insert(key);
            }
            Err(SinkError::AutoplayBlocked) if track.kind == TrackKind::Audio => {
                warn!(
                    "Autoplay blocked for {}; starting muted fallback sink",
                    participant.session_id
                );
                self.start_fallback(core, &participant.session_id, media)
                    .await;

                match self.sink.attach(&participant.session_id, track, media).await {
                    Ok(()) => {
                        core.attached.insert(key);
                    }
                    Err(e) => warn!(
                        "Audio from {} still blocked ({}); will retry on the next track event",
                        participant.session_id, e
                    ),
                }
            }
            Err(e) => warn!(
                "Failed to attach {:?} track from {}: {}",
                track.kind, participant.session_id, e
            ),
        }
    }

    /// Keep the audio pipeline running through a muted sink, once per media
    async fn start_fallback(&self, core: &mut Core, participant_id: &str, media: &MediaHandle) {
        if core.fallbacks.contains_key(&media.id) {
            return;
        }
        match self.sink.attach_fallback(participant_id, media).await {
            Ok(fallback) => {
                core.fallbacks.insert(media.id.clone(), fallback);
            }
            Err(e) => warn!("Failed to start fallback sink: {}", e),
        }
    }

    async fn apply_quality(&self, layer: QualityLayer) -> PracticeResult<()> {
        self.transport
            .update_receive_quality(layer)
            .await
            .map_err(PracticeError::connection)?;
        self.transport
            .update_send_quality(layer.send_preset())
            .await
            .map_err(PracticeError::connection)?;
        info!("Requested quality layer {}", layer as u8);
        Ok(())
    }

    /// Sample received video and audio health; false once the attempt is over
    pub(super) async fn sample_quality(&self, attempt: u64) -> bool {
        let stats: Option<VideoStats> = match self.transport.received_video_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Video stats unavailable: {:#}", e);
                None
            }
        };

        let mut core = self.core.lock().await;
        if core.attempt != attempt || core.status != ConnectionStatus::Connected {
            return false;
        }

        if let Some(stats) = stats {
            let observed = ObservedQuality::measure(&stats, core.requested_layer);
            if observed != core.observed {
                info!(
                    "Received video {} at {} ({:?})",
                    observed.resolution_label, observed.bitrate_label, observed.verification
                );
            }
            core.observed = observed;
        }

        core.refresh_audio_health();
        if core.audio.is_silent() {
            warn!("Remote participants present but no remote audio is attached");
        }
        true
    }

    /// Ends a session from a transport event
    async fn terminate(&self, attempt: u64, reason: EndReason) {
        let status = {
            let core = self.core.lock().await;
            if core.attempt != attempt {
                return;
            }
            core.status
        };

        match (status, &reason) {
            (ConnectionStatus::Connecting, EndReason::TransportError(message)) => {
                self.fail(attempt, PracticeError::connection(message)).await;
            }
            _ => {
                self.finalize(reason.clone()).await;
                if let EndReason::TransportError(message) = reason {
                    let mut core = self.core.lock().await;
                    if core.status == ConnectionStatus::Disconnected {
                        core.status = ConnectionStatus::Failed;
                        core.error = Some(PracticeError::connection(message).user_message());
                    }
                }
            }
        }
    }

    /// Move a connecting attempt to `Failed`, releasing what it acquired
    async fn fail(&self, attempt: u64, err: PracticeError) -> PracticeError {
        let mut core = self.core.lock().await;
        if core.attempt != attempt {
            return err;
        }

        if core.record.is_some() {
            drop(core);
            self.finalize(EndReason::TransportError(err.to_string())).await;
            core = self.core.lock().await;
        } else {
            self.release(&mut core, true).await;
            let next = core.attempt + 1;
            let scenario = core.scenario.take();
            let language = core.language.take();
            *core = Core::new(&self.config, next);
            core.scenario = scenario;
            core.language = language;
        }

        core.status = ConnectionStatus::Failed;
        core.error = Some(err.user_message());
        err
    }

    async fn finalize(&self, reason: EndReason) -> Option<SessionOutcome> {
        let mut core = self.core.lock().await;
        if !core.is_live() {
            debug!("Finalize ({:?}): nothing to clean up", reason);
            return None;
        }

        info!("Finalizing conversation ({:?})", reason);

        let ended_at = self.clock.now();
        self.release(&mut core, reason.may_call_provider()).await;

        let mut outcome = SessionOutcome {
            reason,
            record_id: None,
            duration_minutes: None,
        };

        if let Some(record) = core.record.take() {
            let minutes = elapsed_minutes(record.started_at, ended_at);
            match self
                .ledger
                .close(&record.id, &self.user.user_id, minutes, None, ended_at)
                .await
            {
                Ok(_) => outcome.duration_minutes = Some(minutes),
                Err(e) => error!("Failed to finalize session record {}: {:#}", record.id, e),
            }
            outcome.record_id = Some(record.id);
        }

        let next = core.attempt + 1;
        *core = Core::new(&self.config, next);
        info!("Conversation finalized");
        Some(outcome)
    }

    /// Best-effort release of transport, provider and sink resources
    ///
    /// Never fails; each step logs and moves on.
    async fn release(&self, core: &mut Core, end_remote: bool) {
        if let Some(task) = core.event_task.take() {
            task.abort();
        }
        if let Some(task) = core.quality_task.take() {
            task.abort();
        }
        self.transport.unsubscribe();

        if let Some(conversation_id) = core.conversation_id.take() {
            if end_remote {
                self.end_remote(&conversation_id).await;
            } else {
                info!(
                    "Leaving conversation {} to the provider's idle timeout",
                    conversation_id
                );
            }
        }

        if core.room_url.take().is_some() {
            if let Err(e) = self.transport.leave().await {
                warn!("Failed to leave room: {:#}", e);
            }
            if let Err(e) = self.transport.destroy().await {
                warn!("Failed to destroy {} call object: {:#}", self.transport.name(), e);
            }
        }

        for (_, fallback) in core.fallbacks.drain() {
            if let Err(e) = self.sink.release_fallback(&fallback).await {
                warn!("Failed to release fallback sink {}: {:#}", fallback.id, e);
            }
        }
        core.attached.clear();
        core.participants.clear();
    }

    async fn end_remote(&self, conversation_id: &str) {
        if let Err(e) = self.provisioner.end_conversation(conversation_id).await {
            warn!("Failed to end conversation {}: {:#}", conversation_id, e);
        }
    }
}
