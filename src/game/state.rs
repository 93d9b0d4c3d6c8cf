use serde::{Deserialize, Serialize};

/// Phase of the current question
///
/// `Setup -> Listening -> Speaking -> Evaluating -> Feedback -> Listening ...`,
/// with `Complete` reachable from any in-game phase and left only by reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    #[default]
    Setup,
    /// Prompt is being generated
    Listening,
    /// Countdown running, capture armed
    Speaking,
    /// Capture submitted, judgment pending
    Evaluating,
    /// Result shown, next question scheduled
    Feedback,
    Complete,
}

/// UI-observable game state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameState {
    pub phase: GamePhase,
    pub current_prompt: String,
    pub expected_answer: String,
    pub captured_answer_text: String,
    /// Points earned so far
    pub score: u32,
    pub streak: u32,
    pub question_number: u32,
    pub time_remaining_seconds: u32,
    pub last_answer_correct: Option<bool>,
    pub feedback: Option<String>,
    /// Evaluator's 0..=100 rating of the last answer
    pub answer_score: Option<u32>,
    pub recording: bool,
    pub prompt_audio_ready: bool,
    /// Percentage score, set when the game completes
    pub final_score: Option<u32>,
}

/// Result of a finished game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub record_id: Option<String>,
    pub score: u32,
    pub points: u32,
    pub questions: u32,
    pub duration_minutes: u32,
}

/// `round(points / (questions * points_per_correct) * 100)`, 0 when nothing was asked
pub fn final_score(points: u32, questions: u32, points_per_correct: u32) -> u32 {
    let possible = u64::from(questions) * u64::from(points_per_correct);
    if possible == 0 {
        return 0;
    }
    let percent = (f64::from(points) / possible as f64 * 100.0).round();
    (percent as u32).min(100)
}
