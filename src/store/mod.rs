mod models;
mod registry;
mod schema;
mod sqlite_store;
mod unit_of_work;

pub use models::*;
pub use registry::{get_task, register_task};
pub use schema::ANALYZER_VERSIONED_SCHEMAS;
pub use sqlite_store::SqliteStore;
pub(crate) use sqlite_store::{format_datetime, parse_datetime, parse_optional_datetime};
pub use unit_of_work::{CommittedHooks, UnitOfWork};

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Durable mapping from task identifiers to task metadata.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait TaskRegistry: Send + Sync {
    /// True when some registered task has `id == identifier` or
    /// `task_name == identifier`. Storage errors propagate.
    fn exists_covering(&self, identifier: &str) -> Result<bool>;
    fn get_task(&self, id: &str) -> Result<Option<RegisteredTask>>;
    fn list_tasks(&self) -> Result<Vec<RegisteredTask>>;
    fn register_task(&self, task: &NewRegisteredTask) -> Result<RegisteredTask>;
}

/// History of chain stage executions.
pub trait RunStore: Send + Sync {
    fn record_stage_start(
        &self,
        chain_id: &str,
        stage_index: usize,
        stage_name: &str,
        triggered_by: &str,
    ) -> Result<i64>;
    fn record_stage_finish(
        &self,
        run_id: i64,
        status: StageRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_chain_runs(&self, chain_id: &str) -> Result<Vec<StageRun>>;
    /// Fail the runs still marked running that started before `started_before`.
    /// Younger runs may belong to another live process and are left alone.
    fn mark_stale_runs_failed(&self, started_before: DateTime<Utc>) -> Result<usize>;
}
