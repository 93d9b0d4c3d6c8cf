use crate::context::UserContext;
use crate::conversation::ConversationConfig;
use crate::game::GameSettings;
use crate::services::{Difficulty, EdgeFunctionConfig};
use crate::transport::QualityLayer;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub user: UserSection,
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub services: ServicesConfig,
    pub conversation: ConversationSection,
    pub game: GameSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Default tracing filter; `RUST_LOG` takes precedence
    pub log_level: String,
}

/// The learner this instance serves
#[derive(Debug, Clone, Deserialize)]
pub struct UserSection {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding session and progress tables
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// Base URL of the backend functions
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSection {
    pub quality_check_interval_secs: u64,
    /// End the conversation when the page is hidden
    pub end_on_hidden: bool,
    /// 0 = low, 1 = medium, 2 = high
    pub default_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameSection {
    pub native_language: String,
    pub target_language: String,
    pub difficulty: Difficulty,
    pub seconds_per_question: u32,
    pub points_per_correct: u32,
    pub correct_advance_ms: u64,
    pub incorrect_advance_ms: u64,
    pub speak_prompts: bool,
}

impl Config {
    /// Load `path` (any format the config crate knows, optional) over the
    /// built-in defaults, then apply `LUNA__SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "luna-practice")?
            .set_default("service.log_level", "info")?
            .set_default("user.id", "local-user")?
            .set_default("user.display_name", "Learner")?
            .set_default("http.bind", "127.0.0.1")?
            .set_default("http.port", 8787)?
            .set_default("store.path", "data/luna-practice.json")?
            .set_default("services.base_url", "http://localhost:54321/functions/v1")?
            .set_default("services.api_key", "")?
            .set_default("services.timeout_secs", 30)?
            .set_default("conversation.quality_check_interval_secs", 5)?
            .set_default("conversation.end_on_hidden", true)?
            .set_default("conversation.default_quality", 2)?
            .set_default("game.native_language", "en")?
            .set_default("game.target_language", "hi")?
            .set_default("game.difficulty", "beginner")?
            .set_default("game.seconds_per_question", 30)?
            .set_default("game.points_per_correct", 10)?
            .set_default("game.correct_advance_ms", 1500)?
            .set_default("game.incorrect_advance_ms", 4000)?
            .set_default("game.speak_prompts", true)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LUNA").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    pub fn user(&self) -> UserContext {
        UserContext::new(&self.user.id, &self.user.display_name)
    }

    pub fn conversation_config(&self) -> Result<ConversationConfig> {
        let default_quality = QualityLayer::try_from(self.conversation.default_quality)
            .map_err(|e| anyhow!("Invalid conversation.default_quality: {}", e))?;

        Ok(ConversationConfig {
            quality_check_interval: Duration::from_secs(
                self.conversation.quality_check_interval_secs.max(1),
            ),
            end_on_hidden: self.conversation.end_on_hidden,
            default_quality,
        })
    }

    pub fn game_settings(&self) -> GameSettings {
        GameSettings {
            native_language: self.game.native_language.clone(),
            target_language: self.game.target_language.clone(),
            difficulty: self.game.difficulty,
            seconds_per_question: self.game.seconds_per_question,
            points_per_correct: self.game.points_per_correct,
            correct_advance: Duration::from_millis(self.game.correct_advance_ms),
            incorrect_advance: Duration::from_millis(self.game.incorrect_advance_ms),
            speak_prompts: self.game.speak_prompts,
        }
    }

    pub fn edge_functions(&self) -> EdgeFunctionConfig {
        EdgeFunctionConfig {
            base_url: self.services.base_url.clone(),
            api_key: self.services.api_key.clone(),
            timeout: Duration::from_secs(self.services.timeout_secs),
        }
    }
}
