use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

/// Added to every "not yet due" sleep so clock rounding cannot wake the loop
/// a hair before the due-time and make it spin.
pub const SLACK: StdDuration = StdDuration::from_secs(1);

/// Earliest instant the task may run again, or `None` when it has never run
/// (immediately due).
///
/// Uses the start of the last attempt, finished or not, so a run interrupted
/// by a shutdown never blocks the next one.
pub fn due_time(last_started: Option<DateTime<Utc>>, interval: Duration) -> Option<DateTime<Utc>> {
    last_started.map(|started| {
        started
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}

/// How long to wait before the task is due, or `None` when it is due now.
///
/// Overdue tasks are due now; the remaining time is never negative.
pub fn time_until_due(
    last_started: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Option<StdDuration> {
    let due = due_time(last_started, interval)?;
    if now >= due {
        return None;
    }
    // `due > now`, so the conversion only fails on absurd spans.
    Some((due - now).to_std().unwrap_or(StdDuration::ZERO))
}

/// Sleep for a task that is not yet due: the remaining time plus [`SLACK`].
pub fn not_due_sleep(remaining: StdDuration) -> StdDuration {
    remaining + SLACK
}
