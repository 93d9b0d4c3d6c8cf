use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Conversation lifecycle
        .route("/conversation/start", post(handlers::start_conversation))
        .route("/conversation/end", post(handlers::end_conversation))
        .route("/conversation/signal", post(handlers::conversation_signal))
        .route("/conversation/controls", post(handlers::conversation_controls))
        .route("/conversation/quality", post(handlers::conversation_quality))
        .route("/conversation/status", get(handlers::conversation_status))
        // Client media relay
        .route("/conversation/events", post(handlers::conversation_event))
        .route("/conversation/stats", post(handlers::conversation_stats))
        .route("/conversation/directive", get(handlers::conversation_directive))
        // Translation game
        .route("/game/start", post(handlers::start_game))
        .route("/game/capture", post(handlers::toggle_capture))
        .route("/game/next", post(handlers::next_question))
        .route("/game/end", post(handlers::end_game))
        .route("/game/reset", post(handlers::reset_game))
        .route("/game/state", get(handlers::game_state))
        .route("/game/audio", post(handlers::game_audio))
        // Progress queries
        .route("/progress/:user_id", get(handlers::get_progress))
        .route("/sessions/:user_id", get(handlers::list_sessions))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
