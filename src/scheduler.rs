/// Fixed-interval scheduler
/// Runs the first check immediately, then one per interval. The check runs
/// inline, so a slow check delays the next tick instead of overlapping it;
/// ticks missed meanwhile are skipped, not replayed.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Format duration for logging
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let rem = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, rem)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Run the scheduler loop until `cancel` fires.
/// Cancellation is observed between checks; a running check is allowed to finish.
pub async fn run_scheduler<F, Fut>(period: Duration, cancel: CancellationToken, mut check_fn: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    info!("Scheduler started (every {})", format_duration(period));

    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => {
                info!("Scheduler stopped");
                break;
            }
        }

        debug!("Tick");
        check_fn().await;

        if cancel.is_cancelled() {
            info!("Scheduler stopped");
            break;
        }
    }
}
