use super::models::{NewRegisteredTask, RegisteredTask, StageRun, StageRunStatus};
use super::schema::ANALYZER_VERSIONED_SCHEMAS;
use super::unit_of_work::UnitOfWork;
use super::{registry, RunStore, TaskRegistry};
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// SQLite-backed persistence for hosts, the task registry, analyses and run history.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), ANALYZER_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection mutex poisoned"))
    }

    /// Run `f` against the connection outside of any explicit transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction. The transaction commits when `f` succeeds and
    /// rolls back when it fails; post-commit hooks registered by `f` run after the
    /// commit, once the connection lock has been released.
    pub fn atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, E>,
        E: From<anyhow::Error>,
    {
        let (value, hooks) = {
            let mut conn = self.lock()?;
            let mut uow = UnitOfWork::begin(&mut conn)?;
            match f(&mut uow) {
                Ok(value) => {
                    let hooks = uow.commit()?;
                    (value, hooks)
                }
                Err(e) => {
                    if let Err(rollback_err) = uow.rollback() {
                        warn!("Transaction rollback failed: {}", rollback_err);
                    }
                    return Err(e);
                }
            }
        };
        hooks.run();
        Ok(value)
    }

    fn row_to_stage_run(row: &rusqlite::Row) -> rusqlite::Result<StageRun> {
        let status: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let stage_index: i64 = row.get("stage_index")?;

        Ok(StageRun {
            id: row.get("id")?,
            chain_id: row.get("chain_id")?,
            stage_index: stage_index as usize,
            stage_name: row.get("stage_name")?,
            started_at: parse_datetime(&started_at),
            finished_at: parse_optional_datetime(row.get("finished_at")?),
            status: StageRunStatus::parse(&status).unwrap_or(StageRunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }
}

impl TaskRegistry for SqliteStore {
    fn exists_covering(&self, identifier: &str) -> Result<bool> {
        let conn = self.lock()?;
        registry::exists_covering(&conn, identifier)
    }

    fn get_task(&self, id: &str) -> Result<Option<RegisteredTask>> {
        let conn = self.lock()?;
        registry::get_task(&conn, id)
    }

    fn list_tasks(&self) -> Result<Vec<RegisteredTask>> {
        let conn = self.lock()?;
        registry::list_tasks(&conn)
    }

    fn register_task(&self, task: &NewRegisteredTask) -> Result<RegisteredTask> {
        self.atomic(|uow| registry::register_task(uow, task))
    }
}

impl RunStore for SqliteStore {
    fn record_stage_start(
        &self,
        chain_id: &str,
        stage_index: usize,
        stage_name: &str,
        triggered_by: &str,
    ) -> Result<i64> {
        let conn = self.lock()?;
        let now = format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO chain_stage_runs (chain_id, stage_index, stage_name, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chain_id,
                stage_index as i64,
                stage_name,
                now,
                StageRunStatus::Running.as_str(),
                triggered_by
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn record_stage_finish(
        &self,
        run_id: i64,
        status: StageRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let now = format_datetime(&Utc::now());

        conn.execute(
            "UPDATE chain_stage_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![now, status.as_str(), error_message, run_id],
        )?;

        Ok(())
    }

    fn get_chain_runs(&self, chain_id: &str) -> Result<Vec<StageRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, chain_id, stage_index, stage_name, started_at, finished_at, status, error_message, triggered_by
             FROM chain_stage_runs WHERE chain_id = ?1 ORDER BY stage_index, id",
        )?;

        let runs = stmt
            .query_map(params![chain_id], Self::row_to_stage_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }

    fn mark_stale_runs_failed(&self, started_before: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let now = format_datetime(&Utc::now());

        // Timestamps carry a variable number of fractional digits, so they are
        // compared as parsed values rather than as text.
        let running = {
            let mut stmt =
                conn.prepare("SELECT id, started_at FROM chain_stage_runs WHERE status = ?1")?;
            let rows = stmt
                .query_map(params![StageRunStatus::Running.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut count = 0;
        for (run_id, started_at) in running {
            if parse_datetime(&started_at) >= started_before {
                continue;
            }
            count += conn.execute(
                "UPDATE chain_stage_runs SET status = ?1, finished_at = ?2, error_message = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    StageRunStatus::Failed.as_str(),
                    now,
                    "Stage was interrupted (process restart)",
                    run_id,
                    StageRunStatus::Running.as_str()
                ],
            )?;
        }

        Ok(count)
    }
}
