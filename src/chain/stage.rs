use super::context::StageContext;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unknown stage: {0}")]
    NotFound(String),
    #[error("Chain has no stages")]
    EmptyChain,
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Stage was cancelled")]
    Cancelled,
    #[error("Executor is shutting down")]
    ShuttingDown,
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::ExecutionFailed(format!("{:#}", err))
    }
}

/// Marker the executor carries for each stage. Only `DocumentAnalyzer` stages are
/// expected to have a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Internal,
    DocumentAnalyzer,
}

/// A unit of work the executor can run as one link of a chain.
///
/// `run` executes on a blocking thread. Its arguments are the descriptor arguments,
/// preceded by the previous stage's result for every stage but the first.
pub trait ChainStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn kind(&self) -> StageKind {
        StageKind::Internal
    }

    fn run(&self, ctx: &StageContext, args: Vec<JsonValue>) -> Result<JsonValue, JobError>;
}

/// Read the positional integer argument at `index`.
pub fn i64_arg(args: &[JsonValue], index: usize) -> Result<i64, JobError> {
    args.get(index)
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| JobError::InvalidArguments(format!("expected an integer at position {}", index)))
}

/// Read the positional argument at `index`, failing if it is missing.
pub fn value_arg(args: &[JsonValue], index: usize) -> Result<&JsonValue, JobError> {
    args.get(index)
        .ok_or_else(|| JobError::InvalidArguments(format!("missing argument at position {}", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_positional_args() {
        let args = vec![json!({"host_id": 1}), json!(42), json!("x")];

        assert_eq!(i64_arg(&args, 1).unwrap(), 42);
        assert!(matches!(i64_arg(&args, 2), Err(JobError::InvalidArguments(_))));
        assert!(matches!(i64_arg(&args, 3), Err(JobError::InvalidArguments(_))));
        assert_eq!(value_arg(&args, 0).unwrap()["host_id"], 1);
    }

    #[test]
    fn test_anyhow_errors_become_execution_failures() {
        let err: JobError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, JobError::ExecutionFailed(ref m) if m == "disk full"));
    }
}
