use crate::transport::{ParticipantInfo, QualityLayer, VideoStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state machine
///
/// `Disconnected -> Connecting -> Connected -> Disconnected`, with
/// `Connecting -> Failed` on provisioning or join errors. `Failed` is
/// terminal for the attempt; `start()` re-enters `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Browser/environment lifecycle signals that end a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentSignal {
    /// Tab close or reload
    PageUnload,
    VisibilityHidden,
    /// Back/forward navigation
    HistoryNavigation,
    /// The owning view is being torn down
    Teardown,
}

/// Why a session is being finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    EndCall,
    Signal(EnvironmentSignal),
    RemoteLeft,
    TransportError(String),
}

impl EndReason {
    /// Whether the remote conversation may be ended with a network call
    ///
    /// A closing page relies on the provider's server-side timeout.
    pub fn may_call_provider(&self) -> bool {
        !matches!(self, EndReason::Signal(EnvironmentSignal::PageUnload))
    }
}

impl From<EnvironmentSignal> for EndReason {
    fn from(signal: EnvironmentSignal) -> Self {
        EndReason::Signal(signal)
    }
}

/// Resolution class of received video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityClass {
    High,
    Medium,
    Low,
}

impl QualityClass {
    /// high >= 1280x720, medium >= 640x360, low otherwise
    pub fn classify(width: u32, height: u32) -> Self {
        if width >= 1280 && height >= 720 {
            QualityClass::High
        } else if width >= 640 && height >= 360 {
            QualityClass::Medium
        } else {
            QualityClass::Low
        }
    }

    pub fn layer(&self) -> QualityLayer {
        match self {
            QualityClass::High => QualityLayer::High,
            QualityClass::Medium => QualityLayer::Medium,
            QualityClass::Low => QualityLayer::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    /// No sample since connecting or since the last quality request
    #[default]
    Pending,
    /// Measured class matches the requested layer
    Verified,
    /// Measured class differs from the requested layer
    Mismatch,
}

/// Measured quality of the received video stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedQuality {
    /// -1 until a sample is taken, then 0..=2
    pub layer: i8,
    pub resolution_label: String,
    pub bitrate_label: String,
    pub verification: VerificationState,
}

impl Default for ObservedQuality {
    fn default() -> Self {
        Self {
            layer: -1,
            resolution_label: "unknown".to_string(),
            bitrate_label: "unknown".to_string(),
            verification: VerificationState::Pending,
        }
    }
}

impl ObservedQuality {
    pub fn measure(stats: &VideoStats, requested: QualityLayer) -> Self {
        let class = QualityClass::classify(stats.width, stats.height);
        let verification = if class.layer() == requested {
            VerificationState::Verified
        } else {
            VerificationState::Mismatch
        };

        Self {
            layer: class.layer() as i8,
            resolution_label: format!("{}x{}", stats.width, stats.height),
            bitrate_label: format!("{} kbps", stats.bitrate_kbps),
            verification,
        }
    }
}

/// Result of the periodic audio check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioHealth {
    pub remote_participants: usize,
    pub remote_audio_tracks: usize,
    pub fallback_active: bool,
}

impl AudioHealth {
    /// Remote participants are present but none of them can be heard
    pub fn is_silent(&self) -> bool {
        self.remote_participants > 0 && self.remote_audio_tracks == 0
    }
}

/// UI-observable view of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub status: ConnectionStatus,
    pub scenario: Option<String>,
    pub language: Option<String>,
    pub room_url: Option<String>,
    pub conversation_id: Option<String>,
    pub local_audio: bool,
    pub local_video: bool,
    pub speaker: bool,
    pub requested_layer: QualityLayer,
    pub observed: ObservedQuality,
    pub audio: AudioHealth,
    pub participants: Vec<ParticipantInfo>,
    pub record_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// What finalize wrote for the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub reason: EndReason,
    pub record_id: Option<String>,
    pub duration_minutes: Option<u32>,
}
