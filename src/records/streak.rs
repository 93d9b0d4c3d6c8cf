use super::model::UserProgress;
use super::store::RecordStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// How a completion moved the streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    /// No progress row yet; streak starts at 1
    First,
    /// Same calendar day as the last activity; unchanged
    SameDay,
    /// The day after the last activity; +1
    Consecutive,
    /// More than one day since the last activity; back to 1
    Reset,
    /// Completion dated before the last activity; ignored
    OutOfOrder,
}

/// Apply the same-day / consecutive-day / gap rule
///
/// Days are UTC calendar dates.
pub fn next_streak(progress: Option<&UserProgress>, completed_at: DateTime<Utc>) -> (u32, StreakChange) {
    let Some(progress) = progress else {
        return (1, StreakChange::First);
    };

    let last_day = progress.last_activity.date_naive();
    let day = completed_at.date_naive();
    let days = day.signed_duration_since(last_day).num_days();

    match days {
        d if d < 0 => (progress.streak_days, StreakChange::OutOfOrder),
        // A row created at sign-up has no streak yet; its first completion starts one
        0 if progress.streak_days == 0 => (1, StreakChange::First),
        0 => (progress.streak_days, StreakChange::SameDay),
        1 => (progress.streak_days + 1, StreakChange::Consecutive),
        _ => (1, StreakChange::Reset),
    }
}

/// A completed session, as reported to the progress tracker
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub user_id: String,
    pub completed_at: DateTime<Utc>,
    pub minutes: u32,
}

/// Consumes session completion events
#[async_trait::async_trait]
pub trait ActivityTracker: Send + Sync {
    async fn record_activity(&self, activity: Activity) -> Result<UserProgress>;
}

/// Streak tracker over the record store's progress table
pub struct StreakTracker {
    store: Arc<dyn RecordStore>,
}

impl StreakTracker {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ActivityTracker for StreakTracker {
    async fn record_activity(&self, activity: Activity) -> Result<UserProgress> {
        let existing = self.store.get_progress(&activity.user_id).await?;
        let (streak_days, change) = next_streak(existing.as_ref(), activity.completed_at);

        let mut progress = existing.unwrap_or_else(|| UserProgress {
            user_id: activity.user_id.clone(),
            words_learned: 0,
            speaking_time_minutes: 0,
            streak_days: 0,
            last_activity: activity.completed_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        progress.streak_days = streak_days;
        progress.speaking_time_minutes += activity.minutes;
        if change != StreakChange::OutOfOrder {
            progress.last_activity = activity.completed_at;
        }

        info!(
            "Streak for {}: {} days ({:?})",
            activity.user_id, streak_days, change
        );

        self.store.save_progress(progress).await
    }
}
