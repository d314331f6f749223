//! Analyzer job orchestration core.
//!
//! Launches the host install chain after a host creation commits, reconciles the
//! executor's analyzer tasks against the task registry, and creates analysis records
//! transactionally.

pub mod analysis;
pub mod app;
pub mod chain;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod events;
pub mod hosts;
pub mod metrics;
pub mod permissions;
pub mod reconciler;
pub mod sqlite_persistence;
pub mod stages;
pub mod storage;
pub mod store;

// Re-export commonly used types for convenience
pub use app::AnalyzerJobs;
pub use chain::{ChainRequest, ChainStage, JobError, JobExecutor, LocalChainExecutor};
pub use reconciler::{CheckWarning, DriftReport, Reconciler};
pub use store::{RunStore, SqliteStore, TaskRegistry};
