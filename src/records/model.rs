use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of practice activity a session row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    AiConversation,
    TranslationGame,
    SpeakingPractice,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::AiConversation => "ai_conversation",
            SessionType::TranslationGame => "translation_game",
            SessionType::SpeakingPractice => "speaking_practice",
        }
    }
}

/// One row per attempt at a practice activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSession {
    /// Assigned by the store on creation
    pub id: String,

    pub user_id: String,

    pub session_type: SessionType,

    /// Free-form; translation games store the pair (e.g. "en-hi")
    pub language: String,

    /// 0 while the session is running, measured value (>= 1) once finalized
    pub duration_minutes: u32,

    /// 0..=100
    pub score: u32,

    /// Session start until finalized, then session end
    pub completed_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a session row is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub user_id: String,
    pub session_type: SessionType,
    pub language: String,
    pub duration_minutes: u32,
    pub score: u32,
    pub completed_at: DateTime<Utc>,
}

impl NewSession {
    /// Placeholder row written the moment a session begins
    pub fn placeholder(
        user_id: impl Into<String>,
        session_type: SessionType,
        language: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_type,
            language: language.into(),
            duration_minutes: 0,
            score: 0,
            completed_at: started_at,
        }
    }
}

/// Partial update of a session row; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn apply(&self, session: &mut LearningSession) {
        if let Some(minutes) = self.duration_minutes {
            session.duration_minutes = minutes;
        }
        if let Some(score) = self.score {
            session.score = score.min(100);
        }
        if let Some(at) = self.completed_at {
            session.completed_at = at;
        }
    }
}

/// One row per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: String,
    pub words_learned: u32,
    pub speaking_time_minutes: u32,
    pub streak_days: u32,
    /// Most recent completion that went through the streak rule
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-type totals shown on the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub conversation_sessions: usize,
    pub translation_sessions: usize,
}

impl SessionCounts {
    pub fn tally(sessions: &[LearningSession]) -> Self {
        sessions.iter().fold(Self::default(), |mut counts, s| {
            match s.session_type {
                SessionType::AiConversation => counts.conversation_sessions += 1,
                SessionType::TranslationGame => counts.translation_sessions += 1,
                SessionType::SpeakingPractice => {}
            }
            counts
        })
    }
}
