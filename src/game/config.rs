use crate::error::{PracticeError, PracticeResult};
use crate::services::Difficulty;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-game configuration chosen in the setup phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSettings {
    /// Language the prompt is shown in
    pub native_language: String,

    /// Language the learner answers in
    pub target_language: String,

    pub difficulty: Difficulty,

    /// Countdown length for each question
    /// Default: 30
    pub seconds_per_question: u32,

    /// Points for a correct answer
    /// Default: 10
    pub points_per_correct: u32,

    /// Delay before the next question after a correct answer
    /// Default: 1.5s
    #[serde(with = "millis")]
    pub correct_advance: Duration,

    /// Delay after an incorrect answer or timeout, long enough to read the answer
    /// Default: 4s
    #[serde(with = "millis")]
    pub incorrect_advance: Duration,

    /// Read each prompt aloud when a synthesizer is available
    /// Default: true
    pub speak_prompts: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            native_language: "en".to_string(),
            target_language: "hi".to_string(),
            difficulty: Difficulty::Beginner,
            seconds_per_question: 30,
            points_per_correct: 10,
            correct_advance: Duration::from_millis(1500),
            incorrect_advance: Duration::from_millis(4000),
            speak_prompts: true,
        }
    }
}

impl GameSettings {
    /// Language column of the session row, e.g. "en-hi"
    pub fn language_pair(&self) -> String {
        format!("{}-{}", self.native_language, self.target_language)
    }

    pub fn advance_delay(&self, correct: bool) -> Duration {
        if correct {
            self.correct_advance
        } else {
            self.incorrect_advance
        }
    }

    pub fn validate(&self) -> PracticeResult<()> {
        if self.native_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return Err(PracticeError::invalid_state("Choose both languages to play"));
        }
        if self.native_language == self.target_language {
            return Err(PracticeError::invalid_state(
                "Native and target languages must be different",
            ));
        }
        if self.seconds_per_question == 0 {
            return Err(PracticeError::invalid_state(
                "Time per question must be at least one second",
            ));
        }
        if self.points_per_correct == 0 {
            return Err(PracticeError::invalid_state(
                "Points per correct answer must be positive",
            ));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
