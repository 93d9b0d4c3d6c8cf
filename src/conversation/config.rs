use crate::transport::QualityLayer;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for conversation sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Interval between received-video quality samples
    /// Default: 5 seconds
    pub quality_check_interval: Duration,

    /// Treat the page becoming hidden as the end of the session
    /// Default: true (a hidden tab keeps billing the avatar service)
    pub end_on_hidden: bool,

    /// Quality layer requested when a session starts
    pub default_quality: QualityLayer,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            quality_check_interval: Duration::from_secs(5),
            end_on_hidden: true,
            default_quality: QualityLayer::High,
        }
    }
}
