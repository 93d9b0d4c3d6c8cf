use super::config::GameSettings;
use super::state::{final_score, GamePhase, GameState, GameSummary};
use super::timers::TimerSet;
use crate::audio::{AudioBackendConfig, MicrophoneFactory, SpeechRecorder};
use crate::clock::{elapsed_minutes, Clock};
use crate::context::UserContext;
use crate::error::{PracticeError, PracticeResult};
use crate::records::{NewSession, SessionLedger, SessionType};
use crate::services::{
    AudioPayload, ContentGenerator, Evaluator, GeneratedSentence, SpeechSynthesizer, Transcriber,
};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Collaborators the game talks to
#[derive(Clone)]
pub struct GameServices {
    pub generator: Arc<dyn ContentGenerator>,
    pub transcriber: Arc<dyn Transcriber>,
    pub evaluator: Arc<dyn Evaluator>,
    /// Prompts are only read aloud when present
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub microphone: Arc<dyn MicrophoneFactory>,
}

/// Timed translate-and-speak game
///
/// Every asynchronous step (generation, capture, evaluation, speech
/// synthesis, countdown, auto-advance) is tagged with the question id that
/// was current when it began. Results for an older id, or arriving in an
/// unexpected phase, are dropped.
///
/// Collaborator calls run on tasks owned by the game, not by the caller:
/// an operation that is abandoned half-way (a dropped HTTP request) still
/// reaches feedback.
#[derive(Clone)]
pub struct TranslationGame {
    shared: Arc<Shared>,
}

struct Shared {
    user: UserContext,
    services: GameServices,
    ledger: SessionLedger,
    clock: Arc<dyn Clock>,
    defaults: GameSettings,
    core: Mutex<GameCore>,
}

struct OpenRecord {
    id: String,
}

struct GameCore {
    state: GameState,
    settings: GameSettings,
    /// Bumped when a question begins and when the game ends
    question_id: u64,
    generating: bool,
    processing_capture: bool,
    history: Vec<String>,
    timers: TimerSet,
    recorder: Option<SpeechRecorder>,
    prompt_audio: Option<AudioPayload>,
    record: Option<OpenRecord>,
    started_at: Option<DateTime<Utc>>,
    summary: Option<GameSummary>,
}

impl GameCore {
    fn new(settings: GameSettings, question_id: u64) -> Self {
        Self {
            state: GameState::default(),
            settings,
            question_id,
            generating: false,
            processing_capture: false,
            history: Vec::new(),
            timers: TimerSet::new(),
            recorder: None,
            prompt_audio: None,
            record: None,
            started_at: None,
            summary: None,
        }
    }

    fn in_game(&self) -> bool {
        !matches!(self.state.phase, GamePhase::Setup | GamePhase::Complete)
    }

    /// Detach the live capture; the caller discards it outside the lock
    fn take_capture(&mut self) -> Option<SpeechRecorder> {
        self.state.recording = false;
        self.recorder.take()
    }
}

/// Stop the microphone without keeping what it heard
async fn discard(recorder: Option<SpeechRecorder>) {
    if let Some(recorder) = recorder {
        recorder.discard().await;
    }
}

/// Wait for a game-owned task; false only when it panicked
///
/// Cancellation means a newer question or the end of the game superseded it.
async fn settle(task: JoinHandle<()>, what: &str) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) if e.is_cancelled() => {
            debug!("{} superseded", what);
            true
        }
        Err(e) => {
            error!("{} failed: {}", what, e);
            false
        }
    }
}

/// What the learner gets told about one question
struct Outcome {
    correct: bool,
    heard: String,
    message: String,
    answer_score: Option<u32>,
}

impl Outcome {
    fn incorrect(heard: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correct: false,
            heard: heard.into(),
            message: message.into(),
            answer_score: None,
        }
    }
}

impl TranslationGame {
    pub fn new(
        defaults: GameSettings,
        user: UserContext,
        services: GameServices,
        ledger: SessionLedger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let core = GameCore::new(defaults.clone(), 0);
        Self {
            shared: Arc::new(Shared {
                user,
                services,
                ledger,
                clock,
                defaults,
                core: Mutex::new(core),
            }),
        }
    }

    /// Settings used when a game is started without overrides
    pub fn default_settings(&self) -> &GameSettings {
        &self.shared.defaults
    }

    /// Leave setup and ask the first question
    ///
    /// The session row is written first; if that fails the game is played
    /// without one.
    pub async fn start_game(&self, settings: GameSettings) -> PracticeResult<()> {
        settings.validate()?;
        let shared = &self.shared;

        {
            let mut core = shared.core.lock().await;
            if core.state.phase != GamePhase::Setup || core.started_at.is_some() {
                return Err(PracticeError::invalid_state(
                    "A game is already running; end or reset it first",
                ));
            }

            let started_at = shared.clock.now();
            info!(
                "Starting translation game: {} ({}) for {}",
                settings.language_pair(),
                settings.difficulty.as_str(),
                shared.user.user_id
            );

            let new = NewSession::placeholder(
                &shared.user.user_id,
                SessionType::TranslationGame,
                settings.language_pair(),
                started_at,
            );
            match shared.ledger.open(new).await {
                Ok(record) => core.record = Some(OpenRecord { id: record.id }),
                Err(e) => warn!("Game continues without a session record: {:#}", e),
            }

            core.settings = settings;
            core.started_at = Some(started_at);
        }

        shared.begin_question().await
    }

    /// Skip to the next question, abandoning the current one
    pub async fn next_question(&self) -> PracticeResult<()> {
        self.shared.begin_question().await
    }

    /// Start capturing the answer, or stop and submit it
    pub async fn toggle_capture(&self) -> PracticeResult<()> {
        let shared = &self.shared;
        let mut core = shared.core.lock().await;

        if core.state.phase != GamePhase::Speaking {
            return Err(PracticeError::invalid_state("Not waiting for an answer"));
        }
        if core.processing_capture {
            return Ok(());
        }

        if core.recorder.is_none() {
            let backend = shared
                .services
                .microphone
                .create(AudioBackendConfig::default())
                .map_err(PracticeError::device)?;
            let recorder = SpeechRecorder::start(backend)
                .await
                .map_err(PracticeError::device)?;
            core.recorder = Some(recorder);
            core.state.recording = true;
            debug!("Answer capture armed for question {}", core.question_id);
            return Ok(());
        }

        let id = core.question_id;
        drop(core);
        shared.submit_capture(id).await;
        Ok(())
    }

    /// Finish the game and finalize its session row
    ///
    /// Returns `None` when there is no running game; calling it again after
    /// completion does nothing.
    pub async fn end_game(&self) -> Option<GameSummary> {
        self.shared.end_game().await
    }

    /// Back to setup; a running game is ended first
    pub async fn reset_game(&self) {
        let shared = &self.shared;
        shared.end_game().await;

        let abandoned = {
            let mut core = shared.core.lock().await;
            core.timers.cancel_all();
            let abandoned = core.take_capture();
            let next = core.question_id + 1;
            *core = GameCore::new(shared.defaults.clone(), next);
            abandoned
        };
        discard(abandoned).await;
        info!("Translation game reset");
    }

    pub async fn state(&self) -> GameState {
        self.shared.core.lock().await.state.clone()
    }

    pub async fn settings(&self) -> GameSettings {
        self.shared.core.lock().await.settings.clone()
    }

    /// Synthesized audio for the current prompt, once available
    pub async fn prompt_audio(&self) -> Option<AudioPayload> {
        self.shared.core.lock().await.prompt_audio.clone()
    }

    /// Summary of the last completed game
    pub async fn summary(&self) -> Option<GameSummary> {
        self.shared.core.lock().await.summary.clone()
    }
}

impl Shared {
    async fn begin_question(self: &Arc<Self>) -> PracticeResult<()> {
        let (generation, abandoned, id, settings) = {
            let mut core = self.core.lock().await;
            if !core.in_game() && core.started_at.is_none() {
                return Err(PracticeError::invalid_state("Start a game first"));
            }
            if core.state.phase == GamePhase::Complete {
                return Err(PracticeError::invalid_state("The game is over"));
            }
            if core.generating {
                debug!("Question generation already in progress");
                return Ok(());
            }

            core.timers.cancel_all();
            let abandoned = core.take_capture();

            core.question_id += 1;
            core.generating = true;
            core.processing_capture = false;
            core.prompt_audio = None;

            let seconds = core.settings.seconds_per_question;
            let state = &mut core.state;
            state.phase = GamePhase::Listening;
            state.question_number += 1;
            state.current_prompt.clear();
            state.expected_answer.clear();
            state.captured_answer_text.clear();
            state.last_answer_correct = None;
            state.feedback = None;
            state.answer_score = None;
            state.prompt_audio_ready = false;
            state.time_remaining_seconds = seconds;

            info!(
                "Generating question {} (id {})",
                core.state.question_number, core.question_id
            );

            let generation = tokio::spawn(generate_question(
                Arc::downgrade(self),
                self.services.generator.clone(),
                core.question_id,
                core.settings.clone(),
                core.history.clone(),
            ));
            core.timers.set_work(generation.abort_handle());
            (generation, abandoned, core.question_id, core.settings.clone())
        };

        discard(abandoned).await;
        if !settle(generation, "Question generation").await {
            let failed = Err(anyhow::anyhow!("Sentence generation task panicked"));
            self.apply_question(id, &settings, failed).await;
        }
        Ok(())
    }

    async fn apply_question(
        self: &Arc<Self>,
        id: u64,
        settings: &GameSettings,
        generated: anyhow::Result<GeneratedSentence>,
    ) {
        let mut core = self.core.lock().await;
        if core.question_id != id || core.state.phase != GamePhase::Listening {
            debug!("Discarding generated sentence for stale question {}", id);
            return;
        }
        core.generating = false;

        match generated {
            Ok(sentence) => {
                core.history.push(sentence.prompt.clone());
                core.state.current_prompt = sentence.prompt;
                core.state.expected_answer = sentence.expected_translation;
                core.state.phase = GamePhase::Speaking;
                core.state.time_remaining_seconds = settings.seconds_per_question;

                core.timers
                    .set_countdown(tokio::spawn(run_countdown(Arc::downgrade(self), id)));

                if settings.speak_prompts {
                    if let Some(synthesizer) = self.services.synthesizer.clone() {
                        let text = core.state.current_prompt.clone();
                        core.timers.set_playback(tokio::spawn(speak_prompt(
                            Arc::downgrade(self),
                            synthesizer,
                            id,
                            text,
                            settings.native_language.clone(),
                        )));
                    }
                }
            }
            Err(e) => {
                error!("Failed to generate sentence: {:#}", e);
                self.show_feedback(
                    &mut core,
                    id,
                    Outcome::incorrect(
                        "",
                        "We couldn't come up with a sentence this time. Let's try another one.",
                    ),
                );
            }
        }
    }

    /// One countdown second; false once the countdown is over
    async fn tick(self: &Arc<Self>, id: u64) -> bool {
        let mut core = self.core.lock().await;
        if core.question_id != id
            || core.state.phase != GamePhase::Speaking
            || core.processing_capture
        {
            return false;
        }

        core.state.time_remaining_seconds = core.state.time_remaining_seconds.saturating_sub(1);
        if core.state.time_remaining_seconds > 0 {
            return true;
        }

        // Submission cancels the countdown, so the timeout runs on its own task
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.on_timeout(id).await });
        false
    }

    async fn on_timeout(self: &Arc<Self>, id: u64) {
        let mut core = self.core.lock().await;
        if core.question_id != id
            || core.state.phase != GamePhase::Speaking
            || core.processing_capture
        {
            return;
        }

        info!("Time's up for question {}", id);

        if core.recorder.is_some() {
            drop(core);
            self.submit_capture(id).await;
            return;
        }

        let answer = core.state.expected_answer.clone();
        self.show_feedback(
            &mut core,
            id,
            Outcome::incorrect("", format!("Time's up! The correct answer was: {}", answer)),
        );
    }

    /// Freeze the capture and judge it
    async fn submit_capture(self: &Arc<Self>, id: u64) {
        let judging = {
            let mut core = self.core.lock().await;
            if core.question_id != id
                || core.state.phase != GamePhase::Speaking
                || core.processing_capture
            {
                return;
            }

            core.processing_capture = true;
            core.state.phase = GamePhase::Evaluating;
            core.timers.cancel_countdown();

            let judging = tokio::spawn(judge_answer(
                Arc::downgrade(self),
                self.services.clone(),
                id,
                core.take_capture(),
                core.state.expected_answer.clone(),
                core.settings.clone(),
            ));
            core.timers.set_work(judging.abort_handle());
            judging
        };

        info!("Evaluating answer for question {}", id);
        if !settle(judging, "Answer evaluation").await {
            let outcome = Outcome::incorrect("", "We couldn't check your answer right now.");
            self.apply_judgement(id, outcome).await;
        }
    }

    async fn apply_judgement(self: &Arc<Self>, id: u64, outcome: Outcome) {
        let mut core = self.core.lock().await;
        if core.question_id != id || core.state.phase != GamePhase::Evaluating {
            debug!("Discarding evaluation for stale question {}", id);
            return;
        }
        core.processing_capture = false;
        self.show_feedback(&mut core, id, outcome);
    }

    /// Enter feedback, score the answer and schedule the next question
    fn show_feedback(self: &Arc<Self>, core: &mut GameCore, id: u64, outcome: Outcome) {
        core.timers.cancel_countdown();

        let state = &mut core.state;
        state.phase = GamePhase::Feedback;
        state.recording = false;
        state.last_answer_correct = Some(outcome.correct);
        state.captured_answer_text = outcome.heard;
        state.feedback = Some(outcome.message);
        state.answer_score = outcome.answer_score;

        if outcome.correct {
            state.score += core.settings.points_per_correct;
            state.streak += 1;
        } else {
            state.streak = 0;
        }

        info!(
            "Question {} answered {} (score {}, streak {})",
            state.question_number,
            if outcome.correct { "correctly" } else { "incorrectly" },
            state.score,
            state.streak
        );

        let delay = core.settings.advance_delay(outcome.correct);
        core.timers
            .set_advance(tokio::spawn(advance_after(Arc::downgrade(self), id, delay)));
    }

    async fn auto_advance(self: &Arc<Self>, id: u64) {
        {
            let mut core = self.core.lock().await;
            if core.question_id != id || core.state.phase != GamePhase::Feedback {
                return;
            }
            core.timers.release_advance();
        }

        if let Err(e) = self.begin_question().await {
            debug!("Auto-advance skipped: {}", e);
        }
    }

    async fn store_prompt_audio(&self, id: u64, audio: AudioPayload) {
        let mut core = self.core.lock().await;
        if core.question_id != id {
            return;
        }
        core.prompt_audio = Some(audio);
        core.state.prompt_audio_ready = true;
    }

    async fn end_game(&self) -> Option<GameSummary> {
        let (summary, abandoned, record, ended_at) = {
            let mut core = self.core.lock().await;
            if !core.in_game() {
                debug!("End game: no game running");
                return None;
            }

            core.timers.cancel_all();
            let abandoned = core.take_capture();
            core.question_id += 1;
            core.generating = false;
            core.processing_capture = false;
            core.state.phase = GamePhase::Complete;

            let points = core.state.score;
            let questions = core.state.question_number;
            let score = final_score(points, questions, core.settings.points_per_correct);
            core.state.final_score = Some(score);

            let ended_at = self.clock.now();
            let duration_minutes =
                elapsed_minutes(core.started_at.unwrap_or(ended_at), ended_at);

            let record = core.record.take();
            let summary = GameSummary {
                record_id: record.as_ref().map(|r| r.id.clone()),
                score,
                points,
                questions,
                duration_minutes,
            };
            core.summary = Some(summary.clone());
            (summary, abandoned, record, ended_at)
        };

        discard(abandoned).await;

        if let Some(record) = record {
            let ledger = self.ledger.clone();
            let user_id = self.user.user_id.clone();
            let (minutes, score) = (summary.duration_minutes, summary.score);

            // Runs to completion even if the caller goes away
            let close = tokio::spawn(async move {
                ledger
                    .close(&record.id, &user_id, minutes, Some(score), ended_at)
                    .await
                    .map(|_| ())
                    .map_err(|e| (record.id, e))
            });
            match close.await {
                Ok(Ok(())) => {}
                Ok(Err((id, e))) => error!("Failed to finalize game record {}: {:#}", id, e),
                Err(e) => error!("Game record finalization failed: {}", e),
            }
        }

        info!(
            "Translation game complete: {}% ({} points over {} questions)",
            summary.score, summary.points, summary.questions
        );
        Some(summary)
    }
}

async fn generate_question(
    weak: Weak<Shared>,
    generator: Arc<dyn ContentGenerator>,
    id: u64,
    settings: GameSettings,
    history: Vec<String>,
) {
    let generated = generator
        .generate_sentence(
            &settings.native_language,
            &settings.target_language,
            settings.difficulty,
            &history,
        )
        .await;

    if let Some(shared) = weak.upgrade() {
        shared.apply_question(id, &settings, generated).await;
    }
}

async fn judge_answer(
    weak: Weak<Shared>,
    services: GameServices,
    id: u64,
    recorder: Option<SpeechRecorder>,
    expected: String,
    settings: GameSettings,
) {
    let outcome = judge(&services, recorder, &expected, &settings).await;

    if let Some(shared) = weak.upgrade() {
        shared.apply_judgement(id, outcome).await;
    }
}

/// Transcribe and evaluate; collaborator failures count as incorrect
async fn judge(
    services: &GameServices,
    recorder: Option<SpeechRecorder>,
    expected: &str,
    settings: &GameSettings,
) -> Outcome {
    let no_speech = || {
        Outcome::incorrect(
            "",
            format!("No speech detected. The correct answer was: {}", expected),
        )
    };

    let audio = match recorder {
        Some(recorder) => match recorder.finish().await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Failed to finish answer capture: {:#}", e);
                return Outcome::incorrect(
                    "",
                    format!(
                        "We couldn't process your recording. The correct answer was: {}",
                        expected
                    ),
                );
            }
        },
        None => return no_speech(),
    };
    if audio.is_empty() {
        return no_speech();
    }

    let heard = match services
        .transcriber
        .transcribe(&audio, &settings.target_language)
        .await
    {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            error!("Failed to transcribe answer: {:#}", e);
            return Outcome::incorrect(
                "",
                format!(
                    "We couldn't understand the recording. The correct answer was: {}",
                    expected
                ),
            );
        }
    };
    if heard.is_empty() {
        return no_speech();
    }

    match services
        .evaluator
        .evaluate_translation(
            &heard,
            expected,
            &settings.native_language,
            &settings.target_language,
        )
        .await
    {
        Ok(verdict) => {
            let message = if verdict.is_correct {
                verdict.feedback
            } else {
                format!("{} The correct answer was: {}", verdict.feedback, expected)
            };
            Outcome {
                correct: verdict.is_correct,
                heard,
                message: message.trim().to_string(),
                answer_score: Some(verdict.score.min(100)),
            }
        }
        Err(e) => {
            error!("Failed to evaluate answer: {:#}", e);
            Outcome::incorrect(
                heard,
                format!(
                    "We couldn't check your answer right now. The correct answer was: {}",
                    expected
                ),
            )
        }
    }
}

async fn run_countdown(weak: Weak<Shared>, id: u64) {
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(shared) = weak.upgrade() else {
            break;
        };
        if !shared.tick(id).await {
            break;
        }
    }
}

// Boxed so the advance task can start a question that schedules another advance
fn advance_after(weak: Weak<Shared>, id: u64, delay: Duration) -> BoxFuture<'static, ()> {
    async move {
        sleep(delay).await;
        if let Some(shared) = weak.upgrade() {
            shared.auto_advance(id).await;
        }
    }
    .boxed()
}

async fn speak_prompt(
    weak: Weak<Shared>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    id: u64,
    text: String,
    language: String,
) {
    match synthesizer.synthesize(&text, &language).await {
        Ok(audio) => {
            if let Some(shared) = weak.upgrade() {
                shared.store_prompt_audio(id, audio).await;
            }
        }
        Err(e) => warn!("Prompt will not be read aloud: {:#}", e),
    }
}
