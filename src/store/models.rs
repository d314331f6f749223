use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable name of one invocable unit of work. Compared by exact match.
pub type TaskIdentifier = String;

/// A task recorded in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredTask {
    pub id: TaskIdentifier,
    /// Synonym under which the executor may know this task.
    pub task_name: Option<TaskIdentifier>,
    pub description: Option<String>,
    /// Host that installed this task, if it came from a host manifest.
    pub host_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Values needed to register (or re-register) a task.
#[derive(Debug, Clone, Default)]
pub struct NewRegisteredTask {
    pub id: TaskIdentifier,
    pub task_name: Option<TaskIdentifier>,
    pub description: Option<String>,
    pub host_id: Option<i64>,
}

/// A remote analysis engine that publishes a manifest of installable analyzers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerHost {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub install_completed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAnalyzerHost {
    pub name: String,
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub analyzer_id: TaskIdentifier,
    pub corpus_id: Option<i64>,
    pub creator_id: i64,
    pub corpus_action_id: Option<i64>,
    pub analysis_started: DateTime<Utc>,
    pub analysis_completed: Option<DateTime<Utc>>,
    pub analyzed_documents: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRunStatus {
    Running,
    Completed,
    Failed,
}

impl StageRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRunStatus::Running => "running",
            StageRunStatus::Completed => "completed",
            StageRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(StageRunStatus::Running),
            "completed" => Some(StageRunStatus::Completed),
            "failed" => Some(StageRunStatus::Failed),
            _ => None,
        }
    }
}

/// One execution of one chain stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRun {
    pub id: i64,
    pub chain_id: String,
    pub stage_index: usize,
    pub stage_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: StageRunStatus,
    pub error_message: Option<String>,
    /// What submitted the chain, e.g. "analyzer_host:3".
    pub triggered_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_run_status_parse() {
        for status in [
            StageRunStatus::Running,
            StageRunStatus::Completed,
            StageRunStatus::Failed,
        ] {
            assert_eq!(StageRunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StageRunStatus::parse("paused"), None);
    }
}
