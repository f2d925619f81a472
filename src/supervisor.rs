//! Reset supervision: the daily reset alarm and the stuck-prediction poller.
//!
//! Both loops only enqueue commands; the executor does the work.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{error, info};

use crate::config::DailyResetSchedule;
use crate::executor::EngineHandle;
use crate::types::ResetReason;

/// Next instant strictly after `now` at which the schedule's wall-clock time occurs
/// in its zone.
pub fn next_reset_after(now: DateTime<Utc>, schedule: &DailyResetSchedule) -> DateTime<Utc> {
    let local_now = now.with_timezone(&schedule.offset);
    let today = local_now.date_naive().and_time(schedule.time);
    let candidate = today
        .and_local_timezone(schedule.offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    if candidate > now {
        candidate
    } else {
        candidate + ChronoDuration::days(1)
    }
}

/// Sleep until each scheduled reset, then request it. Re-arms forever.
pub async fn run_daily_reset(engine: EngineHandle, schedule: DailyResetSchedule) {
    info!(
        time = %schedule.time,
        offset = %schedule.offset,
        "🕐 Daily reset scheduled"
    );
    loop {
        let now = Utc::now();
        let next = next_reset_after(now, &schedule);
        let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
        info!(next = %next, wait_secs = wait.as_secs(), "⏳ Next daily reset");
        tokio::time::sleep(wait).await;

        if let Err(e) = engine.reset(ResetReason::DailySchedule).await {
            error!(error = %e, "Daily reset could not be delivered, stopping scheduler");
            return;
        }
    }
}

/// Ask the engine to check for a stuck prediction every `interval`.
pub async fn run_timeout_poller(engine: EngineHandle, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; nothing can be stale yet.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if engine.check_timeout().await.is_err() {
            info!("Executor stopped, timeout poller exiting");
            return;
        }
    }
}
