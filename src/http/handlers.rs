use super::state::AppState;
use crate::audio::AudioFrame;
use crate::conversation::{ConversationSnapshot, EnvironmentSignal, SessionOutcome};
use crate::error::PracticeError;
use crate::game::{GameState, GameSummary};
use crate::records::{LearningSession, SessionCounts, UserProgress};
use crate::services::Difficulty;
use crate::transport::{QualityLayer, TransportEvent, VideoStats};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub scenario: String,
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub signal: EnvironmentSignal,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    /// `None` when there was nothing left to finalize
    pub outcome: Option<SessionOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct ControlsRequest {
    pub audio: Option<bool>,
    pub video: Option<bool>,
    pub speaker: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct QualityRequest {
    pub layer: QualityLayer,
}

#[derive(Debug, Deserialize)]
pub struct StartGameRequest {
    pub native_language: Option<String>,
    pub target_language: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub seconds_per_question: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PromptAudio {
    pub mime_type: String,
    pub audio_base64: String,
}

#[derive(Debug, Serialize)]
pub struct GameStateResponse {
    #[serde(flatten)]
    pub state: GameState,
    pub prompt_audio: Option<PromptAudio>,
}

#[derive(Debug, Serialize)]
pub struct EndGameResponse {
    pub summary: Option<GameSummary>,
}

#[derive(Debug, Deserialize)]
pub struct AudioFrameRequest {
    /// Little-endian i16 PCM, base64 encoded
    pub samples_base64: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub progress: Option<UserProgress>,
    pub counts: SessionCounts,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn practice_error(err: PracticeError) -> Response {
    let status = match &err {
        PracticeError::InvalidState(_) | PracticeError::Cancelled(_) => StatusCode::CONFLICT,
        PracticeError::Provisioning(_)
        | PracticeError::Connection(_)
        | PracticeError::Service(_) => StatusCode::BAD_GATEWAY,
        PracticeError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        PracticeError::Storage(_) | PracticeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("Request failed: {}", err);
    error_response(status, err.user_message())
}

// ============================================================================
// Conversation
// ============================================================================

/// POST /conversation/start
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> Response {
    info!("Conversation requested: {} ({})", req.scenario, req.language);

    match state.conversation.start(&req.scenario, &req.language).await {
        Ok(()) => (StatusCode::OK, Json(state.conversation.snapshot().await)).into_response(),
        Err(e) => practice_error(e),
    }
}

/// POST /conversation/end
pub async fn end_conversation(State(state): State<AppState>) -> Response {
    let outcome = state.conversation.stop().await;
    (StatusCode::OK, Json(EndResponse { outcome })).into_response()
}

/// POST /conversation/signal
/// Page unload, tab hidden, navigation or teardown reported by the client
pub async fn conversation_signal(
    State(state): State<AppState>,
    Json(req): Json<SignalRequest>,
) -> Response {
    info!("Lifecycle signal: {:?}", req.signal);
    let outcome = state.conversation.signal(req.signal).await;
    (StatusCode::OK, Json(EndResponse { outcome })).into_response()
}

/// POST /conversation/controls
pub async fn conversation_controls(
    State(state): State<AppState>,
    Json(req): Json<ControlsRequest>,
) -> Response {
    let conversation = &state.conversation;

    if let Some(enabled) = req.audio {
        if let Err(e) = conversation.set_microphone(enabled).await {
            return practice_error(e);
        }
    }
    if let Some(enabled) = req.video {
        if let Err(e) = conversation.set_camera(enabled).await {
            return practice_error(e);
        }
    }
    if let Some(enabled) = req.speaker {
        if let Err(e) = conversation.set_speaker(enabled).await {
            return practice_error(e);
        }
    }

    (StatusCode::OK, Json(conversation.snapshot().await)).into_response()
}

/// POST /conversation/quality
pub async fn conversation_quality(
    State(state): State<AppState>,
    Json(req): Json<QualityRequest>,
) -> Response {
    match state.conversation.set_quality(req.layer).await {
        Ok(()) => (StatusCode::OK, Json(state.conversation.snapshot().await)).into_response(),
        Err(e) => practice_error(e),
    }
}

/// GET /conversation/status
pub async fn conversation_status(State(state): State<AppState>) -> Json<ConversationSnapshot> {
    Json(state.conversation.snapshot().await)
}

/// POST /conversation/events
/// Transport event observed by the client's media SDK
pub async fn conversation_event(
    State(state): State<AppState>,
    Json(event): Json<TransportEvent>,
) -> Response {
    match state.transport.push_event(event).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

/// POST /conversation/stats
pub async fn conversation_stats(
    State(state): State<AppState>,
    Json(stats): Json<VideoStats>,
) -> StatusCode {
    state.transport.report_stats(stats);
    StatusCode::NO_CONTENT
}

/// GET /conversation/directive
/// What the client's media SDK should currently be doing
pub async fn conversation_directive(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.transport.directive())).into_response()
}

// ============================================================================
// Translation game
// ============================================================================

async fn game_state_response(state: &AppState) -> Response {
    let game_state = state.game.state().await;
    let prompt_audio = state.game.prompt_audio().await.map(|audio| PromptAudio {
        audio_base64: base64::engine::general_purpose::STANDARD.encode(&audio.bytes),
        mime_type: audio.mime_type,
    });

    (
        StatusCode::OK,
        Json(GameStateResponse {
            state: game_state,
            prompt_audio,
        }),
    )
        .into_response()
}

/// POST /game/start
pub async fn start_game(
    State(state): State<AppState>,
    Json(req): Json<StartGameRequest>,
) -> Response {
    let mut settings = state.game.default_settings().clone();
    if let Some(native) = req.native_language {
        settings.native_language = native;
    }
    if let Some(target) = req.target_language {
        settings.target_language = target;
    }
    if let Some(difficulty) = req.difficulty {
        settings.difficulty = difficulty;
    }
    if let Some(seconds) = req.seconds_per_question {
        settings.seconds_per_question = seconds;
    }

    match state.game.start_game(settings).await {
        Ok(()) => game_state_response(&state).await,
        Err(e) => practice_error(e),
    }
}

/// POST /game/capture
/// Start the microphone, or stop it and submit the answer
pub async fn toggle_capture(State(state): State<AppState>) -> Response {
    match state.game.toggle_capture().await {
        Ok(()) => game_state_response(&state).await,
        Err(e) => practice_error(e),
    }
}

/// POST /game/next
pub async fn next_question(State(state): State<AppState>) -> Response {
    match state.game.next_question().await {
        Ok(()) => game_state_response(&state).await,
        Err(e) => practice_error(e),
    }
}

/// POST /game/end
pub async fn end_game(State(state): State<AppState>) -> Response {
    let summary = state.game.end_game().await;
    (StatusCode::OK, Json(EndGameResponse { summary })).into_response()
}

/// POST /game/reset
pub async fn reset_game(State(state): State<AppState>) -> Response {
    state.game.reset_game().await;
    game_state_response(&state).await
}

/// GET /game/state
pub async fn game_state(State(state): State<AppState>) -> Response {
    game_state_response(&state).await
}

/// POST /game/audio
/// Microphone frames captured by the client while an answer is recorded
pub async fn game_audio(
    State(state): State<AppState>,
    Json(req): Json<AudioFrameRequest>,
) -> Response {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(&req.samples_base64) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid audio: {}", e)),
    };
    if bytes.len() % 2 != 0 {
        return error_response(StatusCode::BAD_REQUEST, "PCM payload has an odd byte count");
    }

    let sample_rate = req.sample_rate.unwrap_or(16000);
    let channels = req.channels.unwrap_or(1);
    if sample_rate == 0 || channels == 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "sample_rate and channels must be greater than zero",
        );
    }
    if (bytes.len() / 2) % usize::from(channels) != 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "PCM payload does not hold whole frames for the channel count",
        );
    }

    let frame = AudioFrame {
        samples: bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
        sample_rate,
        channels,
        timestamp_ms: req.timestamp_ms,
    };

    match state.microphone.push(frame).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

// ============================================================================
// Progress
// ============================================================================

/// GET /progress/:user_id
pub async fn get_progress(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    let progress = match state.store.get_progress(&user_id).await {
        Ok(progress) => progress,
        Err(e) => {
            error!("Failed to read progress for {}: {:#}", user_id, e);
            return practice_error(PracticeError::storage(e));
        }
    };
    let counts = match state.store.session_counts(&user_id).await {
        Ok(counts) => counts,
        Err(e) => {
            error!("Failed to count sessions for {}: {:#}", user_id, e);
            return practice_error(PracticeError::storage(e));
        }
    };

    (StatusCode::OK, Json(ProgressResponse { progress, counts })).into_response()
}

/// GET /sessions/:user_id
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.store.list_sessions(&user_id).await {
        Ok(sessions) => (StatusCode::OK, Json::<Vec<LearningSession>>(sessions)).into_response(),
        Err(e) => {
            error!("Failed to list sessions for {}: {:#}", user_id, e);
            practice_error(PracticeError::storage(e))
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
