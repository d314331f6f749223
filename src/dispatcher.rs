//! Launches the host install chain once a host creation has committed.

use crate::chain::{ChainRequest, JobExecutor};
use crate::events::{EntityEvent, EntityListener};
use crate::metrics;
use crate::stages::{INSTALL_STAGE, REQUEST_MANIFEST_STAGE};
use crate::store::UnitOfWork;
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

const INSTALL_CHAIN: &str = "host_install";

/// The chain run for every newly created host: fetch its manifest, then install it.
pub fn install_chain(host_id: i64) -> ChainRequest {
    ChainRequest::new(format!("analyzer_host:{}", host_id))
        .then(REQUEST_MANIFEST_STAGE, vec![json!(host_id)])
        .then(INSTALL_STAGE, vec![json!(host_id)])
}

pub struct CommitTriggeredDispatcher {
    executor: Arc<dyn JobExecutor>,
}

impl CommitTriggeredDispatcher {
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Self { executor }
    }

    /// Defer submission of the install chain for `host_id` until `uow` commits.
    /// Nothing is submitted if the transaction rolls back.
    pub fn on_entity_created(&self, uow: &mut UnitOfWork<'_>, host_id: i64) -> Result<()> {
        let executor = self.executor.clone();
        uow.on_commit(move || submit_install_chain(executor.as_ref(), host_id));
        debug!("Install chain for host {} deferred until commit", host_id);
        Ok(())
    }
}

fn submit_install_chain(executor: &dyn JobExecutor, host_id: i64) {
    match executor.submit_chain(install_chain(host_id)) {
        Ok(chain_id) => {
            info!("Submitted install chain {} for host {}", chain_id, host_id);
            metrics::record_chain_submission(INSTALL_CHAIN, "accepted");
        }
        Err(e) => {
            error!(
                "Failed to submit install chain for host {}: {}",
                host_id, e
            );
            metrics::record_chain_submission(INSTALL_CHAIN, "rejected");
        }
    }
}

impl EntityListener for CommitTriggeredDispatcher {
    fn on_event(&self, event: &EntityEvent, uow: &mut UnitOfWork<'_>) -> Result<()> {
        match *event {
            EntityEvent::HostSaved {
                host_id,
                created: true,
            } => self.on_entity_created(uow, host_id),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{JobError, MockJobExecutor};
    use crate::events::EventBus;
    use crate::hosts::HostService;
    use crate::store::{NewAnalyzerHost, SqliteStore};
    use tempfile::TempDir;

    fn new_host() -> NewAnalyzerHost {
        NewAnalyzerHost {
            name: "engine".to_string(),
            url: "http://engine.local".to_string(),
            api_key: None,
        }
    }

    fn setup(executor: MockJobExecutor) -> (TempDir, SqliteStore, HostService) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("analyzer.db")).unwrap();
        let events = Arc::new(EventBus::new());
        events.subscribe(Arc::new(CommitTriggeredDispatcher::new(Arc::new(executor))));
        let service = HostService::new(store.clone(), events);
        (temp_dir, store, service)
    }

    #[test]
    fn test_install_chain_shape() {
        let chain = install_chain(4);

        assert_eq!(chain.triggering_entity_id, "analyzer_host:4");
        let names: Vec<&str> = chain.stages.iter().map(|s| s.stage_name.as_str()).collect();
        assert_eq!(names, vec!["request_manifest", "install"]);
        assert_eq!(chain.stages[0].arguments, vec![json!(4)]);
        assert_eq!(chain.stages[1].arguments, vec![json!(4)]);
    }

    #[test]
    fn test_commit_submits_exactly_once() {
        let mut executor = MockJobExecutor::new();
        executor
            .expect_submit_chain()
            .withf(|chain| chain.triggering_entity_id == "analyzer_host:1")
            .times(1)
            .returning(|_| Ok("chain-1".to_string()));
        let (_dir, _store, service) = setup(executor);

        service.create_host(&new_host()).unwrap();
    }

    #[test]
    fn test_rollback_submits_nothing() {
        let mut executor = MockJobExecutor::new();
        executor.expect_submit_chain().times(0);
        let (_dir, store, service) = setup(executor);

        let result: Result<()> = store.atomic(|uow| {
            service.create_host_in(uow, &new_host())?;
            anyhow::bail!("caller aborted")
        });

        assert!(result.is_err());
        assert!(service.get_host(1).unwrap().is_none());
    }

    #[test]
    fn test_update_does_not_resubmit() {
        let mut executor = MockJobExecutor::new();
        executor
            .expect_submit_chain()
            .times(1)
            .returning(|_| Ok("chain-1".to_string()));
        let (_dir, _store, service) = setup(executor);

        let mut host = service.create_host(&new_host()).unwrap();
        host.url = "http://other.local".to_string();
        service.update_host(&host).unwrap();
    }

    #[test]
    fn test_submission_failure_does_not_undo_commit() {
        let mut executor = MockJobExecutor::new();
        executor
            .expect_submit_chain()
            .times(1)
            .returning(|_| Err(JobError::ShuttingDown));
        let (_dir, _store, service) = setup(executor);

        let host = service.create_host(&new_host()).unwrap();

        assert!(service.get_host(host.id).unwrap().is_some());
    }
}
