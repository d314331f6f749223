//! What the running executor can invoke, as seen by the reconciler.

use crate::chain::{LocalChainExecutor, StageKind};
use anyhow::Result;
use serde::Serialize;

/// Description of one invocable task, resolved from the live executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub description: String,
    pub kind: StageKind,
}

impl TaskDescriptor {
    pub fn is_document_analyzer(&self) -> bool {
        self.kind == StageKind::DocumentAnalyzer
    }
}

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait DiscoverySource: Send + Sync {
    /// Identifiers of every task the executor can run right now.
    fn list_known_task_identifiers(&self) -> Result<Vec<String>>;

    /// The descriptor for `identifier` if it names a document-analyzer task, `None`
    /// for unknown identifiers and for any other kind of task.
    fn resolve_task_descriptor(&self, identifier: &str) -> Result<Option<TaskDescriptor>>;
}

impl DiscoverySource for LocalChainExecutor {
    fn list_known_task_identifiers(&self) -> Result<Vec<String>> {
        Ok(self
            .stages()
            .iter()
            .map(|stage| stage.name().to_string())
            .collect())
    }

    fn resolve_task_descriptor(&self, identifier: &str) -> Result<Option<TaskDescriptor>> {
        Ok(self
            .stages()
            .into_iter()
            .find(|stage| stage.name() == identifier)
            .map(|stage| TaskDescriptor {
                name: stage.name().to_string(),
                description: stage.description().to_string(),
                kind: stage.kind(),
            })
            .filter(TaskDescriptor::is_document_analyzer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainStage, JobError, StageContext};
    use crate::store::SqliteStore;
    use serde_json::Value as JsonValue;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::runtime::Handle;

    struct NamedStage(&'static str, StageKind);

    impl ChainStage for NamedStage {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "test stage"
        }

        fn kind(&self) -> StageKind {
            self.1
        }

        fn run(&self, _ctx: &StageContext, _args: Vec<JsonValue>) -> Result<JsonValue, JobError> {
            Ok(JsonValue::Null)
        }
    }

    #[tokio::test]
    async fn test_executor_reports_only_analyzers_as_descriptors() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("analyzer.db")).unwrap();
        let executor = LocalChainExecutor::new(
            Handle::current(),
            Arc::new(store),
            std::time::Duration::from_secs(3600),
        );
        executor.register_stage(Arc::new(NamedStage("sentiment", StageKind::DocumentAnalyzer)));
        executor.register_stage(Arc::new(NamedStage("install", StageKind::Internal)));

        assert_eq!(
            executor.list_known_task_identifiers().unwrap(),
            vec!["install", "sentiment"]
        );
        let descriptor = executor.resolve_task_descriptor("sentiment").unwrap().unwrap();
        assert_eq!(descriptor.kind, StageKind::DocumentAnalyzer);
        assert_eq!(descriptor.description, "test stage");
        assert!(executor.resolve_task_descriptor("install").unwrap().is_none());
        assert!(executor.resolve_task_descriptor("unknown").unwrap().is_none());
    }
}
