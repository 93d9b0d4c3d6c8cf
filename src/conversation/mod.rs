//! AI-avatar conversation sessions
//!
//! This module provides the `ConversationSession` orchestrator that manages:
//! - Provisioning the remote conversation and joining its room
//! - Participant and track lifecycle from the realtime transport
//! - Local microphone, camera and speaker controls
//! - Periodic video-quality and audio checks
//! - Exactly-once finalization of the session record on every exit path

mod config;
mod quality;
mod scenario;
mod session;
mod state;

pub use config::ConversationConfig;
pub use scenario::{find_scenario, language_name, scenario_context, Scenario, LANGUAGES, SCENARIOS};
pub use session::ConversationSession;
pub use state::{
    AudioHealth, ConnectionStatus, ConversationSnapshot, EndReason, EnvironmentSignal,
    ObservedQuality, QualityClass, SessionOutcome, VerificationState,
};
