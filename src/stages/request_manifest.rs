use super::{HostManifest, REQUEST_MANIFEST_STAGE};
use crate::chain::{i64_arg, ChainStage, JobError, StageContext};
use crate::hosts::get_host;
use crate::storage::{build_http_client, StorageError, ThreadLocalClient};
use crate::store::SqliteStore;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

/// Fetches the analyzer manifest of a host.
///
/// Arguments: `[host_id]`. Result: the manifest JSON.
pub struct RequestManifestStage {
    store: SqliteStore,
    http: ThreadLocalClient<reqwest::blocking::Client, StorageError>,
}

impl RequestManifestStage {
    pub fn new(store: SqliteStore, timeout: Duration) -> Self {
        Self {
            store,
            http: ThreadLocalClient::new(move || build_http_client(timeout)),
        }
    }
}

impl ChainStage for RequestManifestStage {
    fn name(&self) -> &'static str {
        REQUEST_MANIFEST_STAGE
    }

    fn description(&self) -> &'static str {
        "Fetch the analyzer manifest of a host"
    }

    fn run(&self, ctx: &StageContext, args: Vec<JsonValue>) -> Result<JsonValue, JobError> {
        let host_id = i64_arg(&args, 0)?;
        let host = self
            .store
            .read(|conn| get_host(conn, host_id))?
            .ok_or_else(|| JobError::ExecutionFailed(format!("Analyzer host {} not found", host_id)))?;

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let client = self
            .http
            .get()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        let url = format!("{}/api/analyzers", host.url);
        let mut request = client.get(&url);
        if let Some(api_key) = &host.api_key {
            request = request.bearer_auth(api_key);
        }

        let manifest: HostManifest = request
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| {
                JobError::ExecutionFailed(format!("Manifest request to {} failed: {}", url, e))
            })?;
        info!(
            "Host {} ({}) advertises {} analyzers",
            host.name,
            host_id,
            manifest.analyzers.len()
        );

        serde_json::to_value(&manifest).map_err(|e| JobError::ExecutionFailed(e.to_string()))
    }
}
