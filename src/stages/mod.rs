//! Built-in chain stages run for every new analyzer host.

mod install;
mod request_manifest;

pub use install::InstallStage;
pub use request_manifest::RequestManifestStage;

use crate::chain::{JobError, LocalChainExecutor};
use crate::store::SqliteStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const REQUEST_MANIFEST_STAGE: &str = "request_manifest";
pub const INSTALL_STAGE: &str = "install";

/// The analyzer list a host serves at `{url}/api/analyzers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostManifest {
    pub analyzers: Vec<ManifestAnalyzer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestAnalyzer {
    pub id: String,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl HostManifest {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, JobError> {
        serde_json::from_value(value.clone())
            .map_err(|e| JobError::InvalidArguments(format!("malformed host manifest: {}", e)))
    }
}

/// Register the host install stages on `executor`.
pub fn register_builtin_stages(
    executor: &LocalChainExecutor,
    store: SqliteStore,
    http_timeout: Duration,
) {
    executor.register_stage(Arc::new(RequestManifestStage::new(
        store.clone(),
        http_timeout,
    )));
    executor.register_stage(Arc::new(InstallStage::new(store)));
}
