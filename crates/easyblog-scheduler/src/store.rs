//! Task run history.
//!
//! The scheduler only talks to [`TaskRunStore`]; the SQLite implementation is
//! what both the scheduler process and the `history` command use.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{decode_ts, encode_ts, TaskRunRecord},
};

/// Output written into runs that a previous scheduler process left open.
pub const INTERRUPTED_OUTPUT: &str = "interrupted: scheduler stopped before the run finished";

/// Persistence interface for task runs.
///
/// Writes are partitioned by task name: each task loop is the only writer for
/// its own rows, so implementations need no cross-task coordination.
pub trait TaskRunStore: Send + Sync {
    /// Insert an in-flight record and return its ID.
    fn create_run(&self, name: &str, started_at: DateTime<Utc>) -> Result<i64>;

    /// Most recent record for `name` by `started_at`, finished or not.
    fn latest_run(&self, name: &str) -> Result<Option<TaskRunRecord>>;

    /// Complete a record created by [`create_run`](Self::create_run).
    fn update_run(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        success: bool,
        output: &str,
    ) -> Result<()>;

    /// Newest-first listing, optionally restricted to one task.
    fn recent_runs(&self, name: Option<&str>, limit: usize) -> Result<Vec<TaskRunRecord>>;

    /// Mark every in-flight record as failed. Returns the number of rows closed.
    fn close_interrupted(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// SQLite-backed [`TaskRunStore`].
///
/// Holds its own `Connection` behind a mutex; open one store per process.
#[derive(Clone)]
pub struct SqliteTaskRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskRunStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::new(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Store("connection mutex poisoned".to_string()))
    }
}

impl TaskRunStore for SqliteTaskRunStore {
    fn create_run(&self, name: &str, started_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO task_runs (name, started_at, finished_at, success, output)
             VALUES (?1, ?2, NULL, NULL, '')",
            rusqlite::params![name, encode_ts(started_at)],
        )?;
        let id = conn.last_insert_rowid();
        debug!(task = %name, run_id = id, "run record created");
        Ok(id)
    }

    fn latest_run(&self, name: &str) -> Result<Option<TaskRunRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, name, started_at, finished_at, success, output
                 FROM task_runs WHERE name = ?1
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                [name],
                raw_row,
            )
            .optional()?;
        raw.map(RawRun::into_record).transpose()
    }

    fn update_run(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        success: bool,
        output: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE task_runs SET finished_at = ?1, success = ?2, output = ?3 WHERE id = ?4",
            rusqlite::params![encode_ts(finished_at), success, output, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::RunNotFound { id });
        }
        Ok(())
    }

    fn recent_runs(&self, name: Option<&str>, limit: usize) -> Result<Vec<TaskRunRecord>> {
        let conn = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, name, started_at, finished_at, success, output
             FROM task_runs WHERE (?1 IS NULL OR name = ?1)
             ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![name, limit], raw_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRun::into_record).collect()
    }

    fn close_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE task_runs SET finished_at = ?1, success = 0,
                    output = CASE WHEN output = '' THEN ?2 ELSE output || char(10) || ?2 END
             WHERE finished_at IS NULL",
            rusqlite::params![encode_ts(now), INTERRUPTED_OUTPUT],
        )?;
        if n > 0 {
            info!(count = n, "closed runs interrupted by a previous shutdown");
        }
        Ok(n)
    }
}

/// Row as stored, before timestamp decoding.
struct RawRun {
    id: i64,
    name: String,
    started_at: String,
    finished_at: Option<String>,
    success: Option<bool>,
    output: String,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        id: row.get(0)?,
        name: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        success: row.get(4)?,
        output: row.get(5)?,
    })
}

impl RawRun {
    fn into_record(self) -> Result<TaskRunRecord> {
        Ok(TaskRunRecord {
            id: self.id,
            name: self.name,
            started_at: decode_ts(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(decode_ts).transpose()?,
            success: self.success,
            output: self.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn store() -> SqliteTaskRunStore {
        SqliteTaskRunStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()
    }

    #[test]
    fn latest_run_is_none_without_history() {
        assert!(store().latest_run("ping").unwrap().is_none());
    }

    #[test]
    fn create_then_update_round_trip() {
        let store = store();
        let id = store.create_run("ping", t0()).unwrap();

        let open = store.latest_run("ping").unwrap().unwrap();
        assert!(open.is_in_flight());
        assert_eq!(open.success, None);
        assert_eq!(open.status(), "running");

        store
            .update_run(id, t0() + Duration::seconds(2), true, "pong")
            .unwrap();
        let done = store.latest_run("ping").unwrap().unwrap();
        assert_eq!(done.id, id);
        assert_eq!(done.started_at, t0());
        assert_eq!(done.finished_at, Some(t0() + Duration::seconds(2)));
        assert_eq!(done.success, Some(true));
        assert_eq!(done.output, "pong");
    }

    #[test]
    fn latest_run_orders_by_start_and_filters_by_name() {
        let store = store();
        store.create_run("ping", t0()).unwrap();
        let newest = store.create_run("ping", t0() + Duration::hours(1)).unwrap();
        store.create_run("backup", t0() + Duration::hours(2)).unwrap();

        let latest = store.latest_run("ping").unwrap().unwrap();
        assert_eq!(latest.id, newest);
        assert_eq!(latest.name, "ping");
    }

    #[test]
    fn update_unknown_run_fails() {
        let err = store().update_run(42, t0(), true, "").unwrap_err();
        assert!(matches!(err, SchedulerError::RunNotFound { id: 42 }));
    }

    #[test]
    fn recent_runs_respects_name_and_limit() {
        let store = store();
        for i in 0..5 {
            store.create_run("ping", t0() + Duration::minutes(i)).unwrap();
        }
        store.create_run("backup", t0()).unwrap();

        let all = store.recent_runs(None, 100).unwrap();
        assert_eq!(all.len(), 6);

        let pings = store.recent_runs(Some("ping"), 3).unwrap();
        assert_eq!(pings.len(), 3);
        assert!(pings.iter().all(|r| r.name == "ping"));
        assert!(pings[0].started_at > pings[1].started_at);
    }

    #[test]
    fn close_interrupted_only_touches_open_runs() {
        let store = store();
        let done = store.create_run("ping", t0()).unwrap();
        store.update_run(done, t0(), true, "fine").unwrap();
        store.create_run("ping", t0() + Duration::minutes(1)).unwrap();
        store.create_run("backup", t0()).unwrap();

        let closed = store.close_interrupted(t0() + Duration::minutes(5)).unwrap();
        assert_eq!(closed, 2);

        let runs = store.recent_runs(None, 10).unwrap();
        assert!(runs.iter().all(|r| !r.is_in_flight()));
        let finished = runs.iter().find(|r| r.id == done).unwrap();
        assert_eq!(finished.output, "fine");
        let interrupted = store.latest_run("backup").unwrap().unwrap();
        assert_eq!(interrupted.success, Some(false));
        assert_eq!(interrupted.output, INTERRUPTED_OUTPUT);
    }

    #[test]
    fn file_backed_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let path = path.to_str().unwrap();

        let id = SqliteTaskRunStore::open(path)
            .unwrap()
            .create_run("ping", t0())
            .unwrap();
        let reopened = SqliteTaskRunStore::open(path).unwrap();
        assert_eq!(reopened.latest_run("ping").unwrap().unwrap().id, id);
    }
}
