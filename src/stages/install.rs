use super::{HostManifest, INSTALL_STAGE};
use crate::chain::{i64_arg, value_arg, ChainStage, JobError, StageContext};
use crate::hosts::{get_host, mark_installed};
use crate::store::{register_task, NewRegisteredTask, SqliteStore};
use serde_json::{json, Value as JsonValue};
use tracing::info;

/// Registers every analyzer of a fetched manifest and marks the host installed.
///
/// Arguments: `[manifest, host_id]`, the manifest coming from the previous stage.
/// Result: `{"host_id": .., "installed": ..}`.
pub struct InstallStage {
    store: SqliteStore,
}

impl InstallStage {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

/// Registry id of an analyzer installed from a host.
pub fn installed_task_id(host_id: i64, analyzer_id: &str) -> String {
    format!("{}::{}", host_id, analyzer_id)
}

impl ChainStage for InstallStage {
    fn name(&self) -> &'static str {
        INSTALL_STAGE
    }

    fn description(&self) -> &'static str {
        "Register the analyzers of a host manifest"
    }

    fn run(&self, ctx: &StageContext, args: Vec<JsonValue>) -> Result<JsonValue, JobError> {
        let manifest = HostManifest::from_value(value_arg(&args, 0)?)?;
        let host_id = i64_arg(&args, 1)?;
        if let Some(analyzer) = manifest.analyzers.iter().find(|a| a.id.is_empty()) {
            return Err(JobError::InvalidArguments(format!(
                "manifest analyzer with empty id ({:?})",
                analyzer.task_name
            )));
        }
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let installed = self.store.atomic(|uow| -> Result<usize, JobError> {
            if get_host(uow, host_id)?.is_none() {
                return Err(JobError::ExecutionFailed(format!(
                    "Analyzer host {} not found",
                    host_id
                )));
            }
            for analyzer in &manifest.analyzers {
                register_task(
                    uow,
                    &NewRegisteredTask {
                        id: installed_task_id(host_id, &analyzer.id),
                        task_name: Some(
                            analyzer
                                .task_name
                                .clone()
                                .unwrap_or_else(|| analyzer.id.clone()),
                        ),
                        description: analyzer.description.clone(),
                        host_id: Some(host_id),
                    },
                )?;
            }
            mark_installed(uow, host_id)?;
            Ok(manifest.analyzers.len())
        })?;

        info!("Installed {} analyzers from host {}", installed, host_id);
        Ok(json!({ "host_id": host_id, "installed": installed }))
    }
}
