mod file_config;

pub use file_config::{FileConfig, ReconcilerConfig};

use crate::reconciler::DEFAULT_DISPLAY_LIMIT;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub http_timeout_sec: u64,
    pub stale_run_threshold_sec: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            http_timeout_sec: 30,
            stale_run_threshold_sec: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub http_timeout: Duration,
    /// Stage runs still marked running after this long are failed at startup.
    pub stale_run_threshold: Duration,
    pub reconciler_display_limit: usize,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        // The database file may be created, its directory must exist
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }
        if db_path.is_dir() {
            bail!("db_path is a directory: {:?}", db_path);
        }

        let http_timeout_sec = file.http_timeout_sec.unwrap_or(cli.http_timeout_sec);
        if http_timeout_sec == 0 {
            bail!("http_timeout_sec must be greater than zero");
        }

        let stale_run_threshold_sec = file
            .stale_run_threshold_sec
            .unwrap_or(cli.stale_run_threshold_sec);

        let reconciler_display_limit = file
            .reconciler
            .unwrap_or_default()
            .display_limit
            .unwrap_or(DEFAULT_DISPLAY_LIMIT);

        Ok(Self {
            db_path,
            http_timeout: Duration::from_secs(http_timeout_sec),
            stale_run_threshold: Duration::from_secs(stale_run_threshold_sec),
            reconciler_display_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(temp_dir.path().join("jobs.db")),
            http_timeout_sec: 12,
            stale_run_threshold_sec: 600,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("jobs.db"));
        assert_eq!(config.http_timeout, Duration::from_secs(12));
        assert_eq!(config.stale_run_threshold, Duration::from_secs(600));
        assert_eq!(config.reconciler_display_limit, DEFAULT_DISPLAY_LIMIT);
    }

    #[test]
    fn test_file_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(temp_dir.path().join("cli.db")),
            http_timeout_sec: 12,
            stale_run_threshold_sec: 600,
        };
        let file = FileConfig {
            db_path: Some(temp_dir.path().join("file.db").to_string_lossy().into_owned()),
            http_timeout_sec: Some(3),
            stale_run_threshold_sec: Some(7200),
            reconciler: Some(ReconcilerConfig {
                display_limit: Some(10),
            }),
        };

        let config = AppConfig::resolve(&cli, Some(file)).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("file.db"));
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(config.stale_run_threshold, Duration::from_secs(7200));
        assert_eq!(config.reconciler_display_limit, 10);
    }

    #[test]
    fn test_missing_db_path_fails() {
        let result = AppConfig::resolve(&CliConfig::default(), None);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_path must be specified"));
    }

    #[test]
    fn test_missing_db_directory_fails() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/nonexistent/dir/jobs.db")),
            ..Default::default()
        };

        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_db_path_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };

        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_bare_file_name_is_accepted() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("jobs.db")),
            ..Default::default()
        };

        assert_eq!(
            AppConfig::resolve(&cli, None).unwrap().db_path,
            PathBuf::from("jobs.db")
        );
    }
}
