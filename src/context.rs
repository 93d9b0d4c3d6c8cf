use serde::{Deserialize, Serialize};

/// The signed-in learner, injected into both orchestrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    /// Name shown to the avatar and other call participants
    pub display_name: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Display name derived from the local part of an email address
    pub fn from_email(user_id: impl Into<String>, email: &str) -> Self {
        let local = email.split('@').next().unwrap_or_default();
        let display_name = if local.is_empty() { "user" } else { local };
        Self::new(user_id, display_name)
    }
}
