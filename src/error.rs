//! Error taxonomy shared by both orchestrators.

use thiserror::Error;

/// Errors surfaced by orchestrator operations
///
/// Each variant carries the internal detail for logs; `user_message()`
/// gives the short text shown to the learner.
#[derive(Error, Debug)]
pub enum PracticeError {
    /// Room creation with the provisioning service failed
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Joining the realtime transport failed or the transport reported an error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Camera or microphone could not be acquired or controlled
    #[error("Device error: {0}")]
    Device(String),

    /// Content, transcription or evaluation service failure
    #[error("Service error: {0}")]
    Service(String),

    /// Session record store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The attempt was ended before it completed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PracticeError {
    pub fn provisioning(err: impl std::fmt::Display) -> Self {
        Self::Provisioning(err.to_string())
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn device(err: impl std::fmt::Display) -> Self {
        Self::Device(err.to_string())
    }

    pub fn service(err: impl std::fmt::Display) -> Self {
        Self::Service(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Short, human-readable message safe to show in the UI
    pub fn user_message(&self) -> String {
        match self {
            Self::Provisioning(_) => {
                "Couldn't start a conversation with Luna. Please pick a scenario and try again."
                    .to_string()
            }
            Self::Connection(_) => {
                "Lost connection to the conversation room. Please try again.".to_string()
            }
            Self::Device(_) => {
                "We couldn't access your camera or microphone. Check permissions and try again."
                    .to_string()
            }
            Self::Service(_) => "Something went wrong on our side. Please try again.".to_string(),
            Self::Storage(_) => "Your progress couldn't be saved right now.".to_string(),
            Self::InvalidState(message) => message.clone(),
            Self::Cancelled(_) => "The session was ended.".to_string(),
            Self::Config(_) => "The app is misconfigured.".to_string(),
        }
    }
}

pub type PracticeResult<T> = std::result::Result<T, PracticeError>;
