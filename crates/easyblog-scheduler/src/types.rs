use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Stored in `output` when a successful action printed nothing.
pub const NO_OUTPUT: &str = "OK (no output)";

/// One execution attempt of a task, as persisted in `task_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunRecord {
    /// Autoincrement primary key.
    pub id: i64,
    /// Task name. Not unique: one row per run.
    pub name: String,
    /// When the attempt started. Drives the due-time computation.
    pub started_at: DateTime<Utc>,
    /// `None` while the attempt is in flight (or was interrupted).
    pub finished_at: Option<DateTime<Utc>>,
    /// `None` while in flight.
    pub success: Option<bool>,
    /// Captured stdout/stderr, plus error detail on failure.
    pub output: String,
}

impl TaskRunRecord {
    /// Started but not finished.
    pub fn is_in_flight(&self) -> bool {
        self.finished_at.is_none()
    }

    /// Short status label for listings.
    pub fn status(&self) -> &'static str {
        match self.success {
            None => "running",
            Some(true) => "ok",
            Some(false) => "failed",
        }
    }
}

/// Fixed-width UTC encoding so lexical order in SQLite equals time order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Store(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 9, 59, 59).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let c = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let mut encoded = vec![encode_ts(c), encode_ts(a), encode_ts(b)];
        encoded.sort();
        assert_eq!(encoded, vec![encode_ts(a), encode_ts(b), encode_ts(c)]);
    }

    #[test]
    fn timestamp_survives_encoding() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 17, 12, 30, 0).unwrap();
        assert_eq!(decode_ts(&encode_ts(ts)).unwrap(), ts);
        assert!(decode_ts("yesterday").is_err());
    }
}
