//! Session records and learner progress
//!
//! This module provides:
//! - The `LearningSession` / `UserProgress` rows
//! - The `RecordStore` abstraction with in-memory and JSON-file backends
//! - The streak rule and the `StreakTracker` that applies it
//! - `SessionLedger`, used by both orchestrators to open and finalize rows

mod ledger;
mod model;
mod store;
mod streak;

pub use ledger::SessionLedger;
pub use model::{LearningSession, NewSession, SessionCounts, SessionPatch, SessionType, UserProgress};
pub use store::{JsonFileStore, MemoryStore, RecordStore};
pub use streak::{next_streak, Activity, ActivityTracker, StreakChange, StreakTracker};
