//! Rapid translation game
//!
//! This module provides:
//! - Phase state machine with per-question countdown and auto-advance
//! - Stale-result rejection keyed on a monotonic question id
//! - Final percentage scoring and session record finalization

pub mod config;
pub mod engine;
pub mod state;
pub mod timers;

pub use config::GameSettings;
pub use engine::{GameServices, TranslationGame};
pub use state::{final_score, GamePhase, GameState, GameSummary};
pub use timers::TimerSet;
