//! HTTP control API for the browser client
//!
//! Thin adapters over the two orchestrators:
//! - /conversation/* - start, end, lifecycle signals, controls, media relay
//! - /game/* - translation game actions, state and microphone frames
//! - /progress/:user_id, /sessions/:user_id - learner history
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
