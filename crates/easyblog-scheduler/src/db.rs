use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `task_runs` table (idempotent) and an index on
/// `(name, started_at)` so the per-task "latest run" lookup stays cheap as the
/// history grows. Rows are never deleted here; pruning is an operator concern.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS task_runs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL,
            started_at  TEXT    NOT NULL,   -- RFC 3339, UTC, microseconds
            finished_at TEXT,               -- NULL while in flight
            success     INTEGER,            -- NULL while in flight, else 0/1
            output      TEXT    NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_task_runs_name_started
            ON task_runs (name, started_at DESC);
        ",
    )?;
    Ok(())
}
