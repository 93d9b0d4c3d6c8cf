use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Lifecycle state of a track as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Loading,
    Playable,
    Interrupted,
    Blocked,
    Off,
}

impl TrackState {
    /// Whether a sink may be attached in this state
    pub fn is_attachable(&self) -> bool {
        matches!(self, TrackState::Loading | TrackState::Playable)
    }
}

/// Persistent handle to the media behind a track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub state: TrackState,
    /// Absent until the transport has a stable handle for the media
    #[serde(default)]
    pub media: Option<MediaHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Transport-assigned session id
    pub session_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub local: bool,
}

/// Events delivered by the realtime transport, in no guaranteed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportEvent {
    Joined {
        local_session_id: String,
    },
    Left,
    ParticipantJoined {
        participant: ParticipantInfo,
    },
    ParticipantLeft {
        session_id: String,
    },
    TrackStarted {
        participant: ParticipantInfo,
        track: TrackInfo,
    },
    /// Playback of an attached track was refused by the client's autoplay policy
    AutoplayBlocked {
        participant: ParticipantInfo,
        track: TrackInfo,
    },
    Error {
        message: String,
    },
}
