use super::backend::{
    FallbackSink, PlaybackSink, QualityLayer, RealtimeTransport, SendPreset, SinkError, VideoStats,
};
use super::events::{MediaHandle, TrackInfo, TrackKind, TransportEvent};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 64;

/// A track the client should render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedTrack {
    pub participant_id: String,
    pub kind: TrackKind,
    pub media_id: String,
}

/// What the browser client should be doing right now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDirective {
    /// Room to be joined, `None` when the client should be out of any call
    pub room_url: Option<String>,
    pub display_name: String,
    pub local_audio: bool,
    pub local_video: bool,
    pub speaker: bool,
    pub receive_layer: QualityLayer,
    pub send_preset: SendPreset,
    pub attached: Vec<AttachedTrack>,
    pub fallback_sinks: Vec<FallbackSink>,
}

impl Default for RelayDirective {
    fn default() -> Self {
        Self {
            room_url: None,
            display_name: String::new(),
            local_audio: true,
            local_video: true,
            speaker: true,
            receive_layer: QualityLayer::High,
            send_preset: SendPreset::H720,
            attached: Vec::new(),
            fallback_sinks: Vec::new(),
        }
    }
}

/// Transport whose real media stack lives in the browser
///
/// Commands issued by the orchestrator are folded into a `RelayDirective`
/// the client polls; events and stats measured by the client are pushed
/// back in through `push_event` / `report_stats`.
#[derive(Default)]
pub struct ClientRelayTransport {
    directive: Mutex<RelayDirective>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    stats: Mutex<Option<VideoStats>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ClientRelayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directive(&self) -> RelayDirective {
        lock(&self.directive).clone()
    }

    /// Forward an event observed by the client to the current subscriber
    pub async fn push_event(&self, event: TransportEvent) -> Result<()> {
        let sender = lock(&self.events).clone();
        let Some(sender) = sender else {
            bail!("No active conversation is listening for transport events");
        };

        debug!("Relaying transport event: {:?}", event);
        if sender.send(event).await.is_err() {
            bail!("Conversation stopped listening for transport events");
        }
        Ok(())
    }

    pub fn report_stats(&self, stats: VideoStats) {
        *lock(&self.stats) = Some(stats);
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for ClientRelayTransport {
    fn subscribe(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        *lock(&self.events) = Some(tx);
        rx
    }

    fn unsubscribe(&self) {
        lock(&self.events).take();
    }

    async fn join(&self, room_url: &str, display_name: &str) -> Result<()> {
        info!("Relay: client asked to join {}", room_url);
        let mut directive = lock(&self.directive);
        directive.room_url = Some(room_url.to_string());
        directive.display_name = display_name.to_string();
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        let mut directive = lock(&self.directive);
        directive.room_url = None;
        directive.attached.clear();
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        *lock(&self.directive) = RelayDirective::default();
        lock(&self.stats).take();
        Ok(())
    }

    async fn set_local_audio(&self, enabled: bool) -> Result<()> {
        lock(&self.directive).local_audio = enabled;
        Ok(())
    }

    async fn set_local_video(&self, enabled: bool) -> Result<()> {
        lock(&self.directive).local_video = enabled;
        Ok(())
    }

    async fn update_receive_quality(&self, layer: QualityLayer) -> Result<()> {
        lock(&self.directive).receive_layer = layer;
        Ok(())
    }

    async fn update_send_quality(&self, preset: SendPreset) -> Result<()> {
        lock(&self.directive).send_preset = preset;
        Ok(())
    }

    async fn received_video_stats(&self) -> Result<Option<VideoStats>> {
        Ok(*lock(&self.stats))
    }

    fn name(&self) -> &str {
        "client-relay"
    }
}

#[async_trait::async_trait]
impl PlaybackSink for ClientRelayTransport {
    async fn attach(
        &self,
        participant_id: &str,
        track: &TrackInfo,
        media: &MediaHandle,
    ) -> Result<(), SinkError> {
        let mut directive = lock(&self.directive);
        let entry = AttachedTrack {
            participant_id: participant_id.to_string(),
            kind: track.kind,
            media_id: media.id.clone(),
        };
        if !directive.attached.contains(&entry) {
            directive.attached.push(entry);
        }
        Ok(())
    }

    async fn attach_fallback(
        &self,
        participant_id: &str,
        media: &MediaHandle,
    ) -> Result<FallbackSink, SinkError> {
        let sink = FallbackSink {
            id: format!("fallback-{}", media.id),
            participant_id: participant_id.to_string(),
        };
        lock(&self.directive).fallback_sinks.push(sink.clone());
        Ok(sink)
    }

    async fn release_fallback(&self, sink: &FallbackSink) -> Result<()> {
        lock(&self.directive).fallback_sinks.retain(|s| s != sink);
        Ok(())
    }

    async fn detach_participant(&self, participant_id: &str) {
        lock(&self.directive)
            .attached
            .retain(|t| t.participant_id != participant_id);
    }

    async fn set_speaker(&self, enabled: bool) -> Result<()> {
        lock(&self.directive).speaker = enabled;
        Ok(())
    }
}
