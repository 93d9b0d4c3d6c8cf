use crate::context::UserContext;
use crate::error::{PracticeError, PracticeResult};
use crate::services::ScenarioContext;
use chrono::{DateTime, Utc};

/// A practice situation the avatar can play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scenario {
    pub id: &'static str,
    pub name: &'static str,
    pub setting: &'static str,
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        id: "casual-conversation",
        name: "Casual Conversation",
        setting: "a friendly, everyday chat about hobbies, weather and life",
    },
    Scenario {
        id: "business-meeting",
        name: "Business Meeting",
        setting: "a professional meeting with presentations and workplace discussion",
    },
    Scenario {
        id: "travel-guide",
        name: "Travel & Tourism",
        setting: "asking for directions, booking hotels and ordering food while travelling",
    },
    Scenario {
        id: "coffee-shop",
        name: "Coffee Shop",
        setting: "ordering drinks and making small talk with a barista",
    },
    Scenario {
        id: "academic",
        name: "Academic Discussion",
        setting: "a university conversation about research topics and study groups",
    },
    Scenario {
        id: "dating",
        name: "Dating & Relationships",
        setting: "getting to know someone on a first date",
    },
    Scenario {
        id: "airport",
        name: "Airport & Transportation",
        setting: "check-in, security and public transportation",
    },
    Scenario {
        id: "shopping",
        name: "Shopping & Retail",
        setting: "buying clothes, asking for sizes and returning items",
    },
];

/// Supported conversation languages (code, name)
pub const LANGUAGES: &[(&str, &str)] = &[
    ("multilingual", "Multilingual"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("zh", "Chinese"),
    ("ar", "Arabic"),
    ("hi", "Hindi"),
];

pub fn find_scenario(id: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.id == id)
}

pub fn language_name(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Build the provisioning context for a scenario and language
///
/// Unknown scenarios or languages are rejected before any service is called.
pub fn scenario_context(
    scenario_id: &str,
    language: &str,
    user: &UserContext,
    now: DateTime<Utc>,
) -> PracticeResult<ScenarioContext> {
    let scenario = find_scenario(scenario_id).ok_or_else(|| {
        PracticeError::invalid_state(format!("Unknown scenario: {}", scenario_id))
    })?;
    let language_label = language_name(language).ok_or_else(|| {
        PracticeError::invalid_state(format!("Unsupported language: {}", language))
    })?;

    let (prompt, greeting) = if language == "multilingual" {
        (
            format!(
                "You are Luna, a friendly multilingual language tutor. Ask which language the \
                 learner wants to practice, then role-play {} in that language. Gently correct \
                 mistakes and keep the conversation flowing.",
                scenario.setting
            ),
            "Hi there! Which language would you like to practice speaking today?".to_string(),
        )
    } else {
        (
            format!(
                "You are Luna, a friendly {} conversation partner. Role-play {} at a pace \
                 suited to a language learner. Gently correct mistakes and ask follow-up \
                 questions.",
                language_label, scenario.setting
            ),
            format!(
                "Hello! I'm excited to help you practice {} today. Let's begin!",
                language_label
            ),
        )
    };

    Ok(ScenarioContext {
        scenario: scenario.id.to_string(),
        language: language.to_string(),
        room_name: format!(
            "luna-{}-{}-{}",
            scenario.id,
            user.user_id,
            now.timestamp_millis()
        ),
        participant_name: user.display_name.clone(),
        prompt,
        greeting,
    })
}
