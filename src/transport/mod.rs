//! Realtime media transport seam
//!
//! The conversation orchestrator only talks to the call through
//! `RealtimeTransport` and renders tracks through `PlaybackSink`.

pub mod backend;
pub mod events;
pub mod relay;

pub use backend::{
    FallbackSink, PlaybackSink, QualityLayer, RealtimeTransport, SendPreset, SinkError, VideoStats,
};
pub use events::{MediaHandle, ParticipantInfo, TrackInfo, TrackKind, TrackState, TransportEvent};
pub use relay::{AttachedTrack, ClientRelayTransport, RelayDirective};
