//! External collaborators the orchestrators depend on
//!
//! Each collaborator is a trait so both orchestrators can run against
//! fakes in tests. `EdgeFunctionClient` implements all of them over the
//! backend's HTTP functions.

mod edge;

pub use edge::{EdgeFunctionClient, EdgeFunctionConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Context passed to the provisioning service when a conversation starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContext {
    pub scenario: String,
    pub language: String,
    pub room_name: String,
    pub participant_name: String,
    /// Conversational instructions for the avatar
    pub prompt: String,
    pub greeting: String,
}

/// Handle to a provisioned remote conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHandle {
    pub room_url: String,
    pub conversation_id: String,
}

/// Creates and ends the remote AI-avatar conversation
#[async_trait::async_trait]
pub trait ConversationProvisioner: Send + Sync {
    async fn create_conversation(&self, context: &ScenarioContext) -> Result<ConversationHandle>;

    /// Best-effort; callers log failures and carry on
    async fn end_conversation(&self, conversation_id: &str) -> Result<()>;
}

/// Sentence difficulty for the translation game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            other => anyhow::bail!("Unknown difficulty: {}", other),
        }
    }
}

/// A generated prompt and the translation the learner should say
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSentence {
    pub prompt: String,
    pub expected_translation: String,
}

#[async_trait::async_trait]
pub trait ContentGenerator: Send + Sync {
    /// `avoid` lists prompts already asked in this game
    async fn generate_sentence(
        &self,
        native_language: &str,
        target_language: &str,
        difficulty: Difficulty,
        avoid: &[String],
    ) -> Result<GeneratedSentence>;
}

/// Encoded audio passed between capture, transcription and synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioPayload {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioPayload, language: &str) -> Result<String>;
}

/// Evaluator's judgment of one answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_correct: bool,
    /// 0..=100
    pub score: u32,
    pub feedback: String,
}

#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate_translation(
        &self,
        user_text: &str,
        expected_text: &str,
        native_language: &str,
        target_language: &str,
    ) -> Result<Verdict>;
}

/// Optional text-to-speech for prompts
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioPayload>;
}
