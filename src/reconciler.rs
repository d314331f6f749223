//! Registry drift detection.
//!
//! Every document-analyzer task the executor can invoke should have a registry entry.
//! The check is advisory and never fails: internal errors produce an empty report.

use crate::discovery::DiscoverySource;
use crate::metrics;
use crate::store::{TaskIdentifier, TaskRegistry};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_DISPLAY_LIMIT: usize = 3;
pub const MISSING_TASKS_WARNING_ID: &str = "analyzer.W001";
const MISSING_TASKS_HINT: &str =
    "Register the missing tasks (analyzer-jobs register-task) or reinstall the host that provides them.";

/// A warning record for an external check-reporting surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckWarning {
    pub message: String,
    pub hint: String,
    pub id: String,
}

/// Analyzer tasks that are invocable but not covered by any registry entry, in
/// discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub unsynced: Vec<TaskIdentifier>,
    pub display_limit: usize,
}

impl DriftReport {
    pub fn new(unsynced: Vec<TaskIdentifier>, display_limit: usize) -> Self {
        Self {
            unsynced,
            display_limit,
        }
    }

    pub fn empty(display_limit: usize) -> Self {
        Self::new(Vec::new(), display_limit)
    }

    pub fn is_empty(&self) -> bool {
        self.unsynced.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.unsynced.len() > self.display_limit
    }

    pub fn displayed(&self) -> &[TaskIdentifier] {
        &self.unsynced[..self.unsynced.len().min(self.display_limit)]
    }

    pub fn message(&self) -> String {
        let mut message = format!(
            "Analyzer tasks missing from the task registry: {}",
            self.displayed().join(", ")
        );
        if self.is_truncated() {
            message.push_str("...");
        }
        message
    }

    /// At most one warning, none for an empty report.
    pub fn warnings(&self) -> Vec<CheckWarning> {
        if self.is_empty() {
            return Vec::new();
        }
        vec![CheckWarning {
            message: self.message(),
            hint: MISSING_TASKS_HINT.to_string(),
            id: MISSING_TASKS_WARNING_ID.to_string(),
        }]
    }
}

pub struct Reconciler {
    discovery: Arc<dyn DiscoverySource>,
    registry: Arc<dyn TaskRegistry>,
    display_limit: usize,
}

impl Reconciler {
    pub fn new(discovery: Arc<dyn DiscoverySource>, registry: Arc<dyn TaskRegistry>) -> Self {
        Self {
            discovery,
            registry,
            display_limit: DEFAULT_DISPLAY_LIMIT,
        }
    }

    pub fn with_display_limit(mut self, display_limit: usize) -> Self {
        self.display_limit = display_limit;
        self
    }

    /// Compare invocable analyzer tasks against the registry. Never fails.
    pub fn check_drift(&self) -> DriftReport {
        match self.find_unsynced() {
            Ok(unsynced) => {
                metrics::set_registry_missing_tasks(unsynced.len());
                if !unsynced.is_empty() {
                    info!(
                        "{} analyzer tasks are missing from the registry",
                        unsynced.len()
                    );
                }
                DriftReport::new(unsynced, self.display_limit)
            }
            Err(e) => {
                warn!("Registry drift check failed, reporting no drift: {:#}", e);
                metrics::record_reconciler_error();
                DriftReport::empty(self.display_limit)
            }
        }
    }

    fn find_unsynced(&self) -> Result<Vec<TaskIdentifier>> {
        let mut unsynced = Vec::new();
        for identifier in self.discovery.list_known_task_identifiers()? {
            if self
                .discovery
                .resolve_task_descriptor(&identifier)?
                .is_none()
            {
                continue;
            }
            if !self.registry.exists_covering(&identifier)? {
                unsynced.push(identifier);
            }
        }
        Ok(unsynced)
    }
}
