//! Shared setup for end-to-end tests.
//!
//! [`TestCore`] opens the fully wired core on a temporary database and
//! [`TestHost`] serves an analyzer manifest over HTTP.

use analyzer_jobs::chain::{ChainStage, JobError, StageContext, StageKind};
use analyzer_jobs::config::{AppConfig, CliConfig};
use analyzer_jobs::AnalyzerJobs;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Handle;

pub struct TestCore {
    pub app: AnalyzerJobs,
    _temp_dir: TempDir,
}

impl TestCore {
    pub fn open() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(temp_dir.path().join("analyzer.db")),
            http_timeout_sec: 5,
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        let app = AnalyzerJobs::open(&config, Handle::current()).unwrap();
        Self {
            app,
            _temp_dir: temp_dir,
        }
    }

    /// Make a document analyzer named `name` invocable by the executor.
    pub fn add_analyzer(&self, name: &'static str) {
        self.app
            .executor
            .register_stage(Arc::new(TestAnalyzer { name }));
    }

    /// Stage names recorded for chains triggered by `host_id`, in execution order.
    pub fn stage_runs_for_host(&self, host_id: i64) -> Vec<(String, String)> {
        self.app
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT stage_name, status FROM chain_stage_runs
                     WHERE triggered_by = ?1 ORDER BY id",
                )?;
                let runs = stmt
                    .query_map([format!("analyzer_host:{}", host_id)], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(runs)
            })
            .unwrap()
    }
}

struct TestAnalyzer {
    name: &'static str,
}

impl ChainStage for TestAnalyzer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Test document analyzer"
    }

    fn kind(&self) -> StageKind {
        StageKind::DocumentAnalyzer
    }

    fn run(&self, _ctx: &StageContext, _args: Vec<JsonValue>) -> Result<JsonValue, JobError> {
        Ok(JsonValue::Null)
    }
}

/// An analyzer host serving `manifest` at `/api/analyzers`.
pub struct TestHost {
    pub server: mockito::ServerGuard,
    pub manifest_mock: mockito::Mock,
}

impl TestHost {
    pub async fn serving(manifest: JsonValue) -> Self {
        let mut server = mockito::Server::new_async().await;
        let manifest_mock = server
            .mock("GET", "/api/analyzers")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(manifest.to_string())
            .create_async()
            .await;
        Self {
            server,
            manifest_mock,
        }
    }

    pub async fn failing(status: usize) -> Self {
        let mut server = mockito::Server::new_async().await;
        let manifest_mock = server
            .mock("GET", "/api/analyzers")
            .with_status(status)
            .create_async()
            .await;
        Self {
            server,
            manifest_mock,
        }
    }

    pub fn url(&self) -> String {
        self.server.url()
    }
}
