use super::session::Shared;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Periodic received-video and audio check while connected
pub(super) async fn monitor(weak: Weak<Shared>, attempt: u64, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing is flowing yet
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(shared) = weak.upgrade() else {
            break;
        };
        if !shared.sample_quality(attempt).await {
            break;
        }
    }

    debug!("Quality monitor stopped (attempt {})", attempt);
}
