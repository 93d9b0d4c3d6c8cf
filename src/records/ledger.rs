use super::model::{LearningSession, NewSession, SessionPatch};
use super::store::RecordStore;
use super::streak::{Activity, ActivityTracker};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Opens and closes session rows on behalf of an orchestrator
///
/// Closing a row also reports the completion to the progress tracker.
#[derive(Clone)]
pub struct SessionLedger {
    store: Arc<dyn RecordStore>,
    tracker: Arc<dyn ActivityTracker>,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn RecordStore>, tracker: Arc<dyn ActivityTracker>) -> Self {
        Self { store, tracker }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Write the placeholder row for a session that just began
    pub async fn open(&self, new: NewSession) -> Result<LearningSession> {
        let session = self
            .store
            .create_session(new)
            .await
            .context("Failed to create session record")?;

        info!(
            "Session record created: {} ({:?}, {})",
            session.id, session.session_type, session.language
        );

        Ok(session)
    }

    /// Finalize a row with its measured duration, end time and optional score
    pub async fn close(
        &self,
        id: &str,
        user_id: &str,
        duration_minutes: u32,
        score: Option<u32>,
        completed_at: DateTime<Utc>,
    ) -> Result<LearningSession> {
        let patch = SessionPatch {
            duration_minutes: Some(duration_minutes),
            score,
            completed_at: Some(completed_at),
        };

        let session = self
            .store
            .update_session(id, patch)
            .await
            .context("Failed to finalize session record")?;

        info!(
            "Session record finalized: {} ({} min, score {})",
            session.id, session.duration_minutes, session.score
        );

        let activity = Activity {
            user_id: user_id.to_string(),
            completed_at,
            minutes: duration_minutes,
        };
        if let Err(e) = self.tracker.record_activity(activity).await {
            warn!("Failed to update progress for {}: {:#}", user_id, e);
        }

        Ok(session)
    }
}
