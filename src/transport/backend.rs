use super::events::{MediaHandle, TrackInfo, TransportEvent};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Discrete video quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QualityLayer {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl TryFrom<u8> for QualityLayer {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QualityLayer::Low),
            1 => Ok(QualityLayer::Medium),
            2 => Ok(QualityLayer::High),
            other => Err(format!("Quality layer must be 0, 1 or 2 (got {})", other)),
        }
    }
}

impl From<QualityLayer> for u8 {
    fn from(layer: QualityLayer) -> Self {
        layer as u8
    }
}

impl QualityLayer {
    pub fn send_preset(&self) -> SendPreset {
        match self {
            QualityLayer::Low => SendPreset::H360,
            QualityLayer::Medium => SendPreset::H540,
            QualityLayer::High => SendPreset::H720,
        }
    }
}

/// Local camera encoding preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendPreset {
    H360,
    H540,
    H720,
}

impl SendPreset {
    pub fn max_bitrate_kbps(&self) -> u32 {
        match self {
            SendPreset::H360 => 400,
            SendPreset::H540 => 800,
            SendPreset::H720 => 1500,
        }
    }
}

/// Measured properties of the received remote video
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoStats {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

/// Realtime media transport (call/room abstraction)
///
/// Events are delivered on the receiver returned by `subscribe`; only one
/// subscription is live at a time and `unsubscribe` closes it.
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    fn subscribe(&self) -> mpsc::Receiver<TransportEvent>;

    fn unsubscribe(&self);

    async fn join(&self, room_url: &str, display_name: &str) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    /// Release the call object; the transport may be joined again afterwards
    async fn destroy(&self) -> Result<()>;

    async fn set_local_audio(&self, enabled: bool) -> Result<()>;

    async fn set_local_video(&self, enabled: bool) -> Result<()>;

    async fn update_receive_quality(&self, layer: QualityLayer) -> Result<()>;

    async fn update_send_quality(&self, preset: SendPreset) -> Result<()>;

    /// Latest received video measurements, if any video is flowing
    async fn received_video_stats(&self) -> Result<Option<VideoStats>>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The environment refused to start playback without a user gesture
    #[error("Playback blocked by autoplay policy")]
    AutoplayBlocked,

    #[error("Playback failed: {0}")]
    Failed(String),
}

/// A hidden, muted-but-playing audio element that keeps the media
/// pipeline active after an autoplay block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FallbackSink {
    pub id: String,
    pub participant_id: String,
}

/// Where remote (and local preview) tracks are rendered
#[async_trait::async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn attach(
        &self,
        participant_id: &str,
        track: &TrackInfo,
        media: &MediaHandle,
    ) -> Result<(), SinkError>;

    async fn attach_fallback(
        &self,
        participant_id: &str,
        media: &MediaHandle,
    ) -> Result<FallbackSink, SinkError>;

    async fn release_fallback(&self, sink: &FallbackSink) -> Result<()>;

    async fn detach_participant(&self, participant_id: &str);

    /// Local speaker output; never touches remote tracks
    async fn set_speaker(&self, enabled: bool) -> Result<()>;
}
