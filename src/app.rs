use crate::chain::{JobExecutor, LocalChainExecutor};
use crate::config::AppConfig;
use crate::dispatcher::CommitTriggeredDispatcher;
use crate::events::EventBus;
use crate::hosts::HostService;
use crate::reconciler::Reconciler;
use crate::stages::register_builtin_stages;
use crate::store::SqliteStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// The wired-up core: store, executor with the built-in stages, and the host write
/// path with the install dispatcher subscribed.
pub struct AnalyzerJobs {
    pub store: SqliteStore,
    pub executor: Arc<LocalChainExecutor>,
    pub hosts: HostService,
    display_limit: usize,
}

impl AnalyzerJobs {
    pub fn open(config: &AppConfig, runtime: Handle) -> Result<Self> {
        info!("Opening SQLite database at {:?}...", config.db_path);
        let store = SqliteStore::new(&config.db_path)?;

        let executor = Arc::new(LocalChainExecutor::new(
            runtime,
            Arc::new(store.clone()),
            config.stale_run_threshold,
        ));
        register_builtin_stages(&executor, store.clone(), config.http_timeout);

        let events = Arc::new(EventBus::new());
        let job_executor: Arc<dyn JobExecutor> = executor.clone();
        events.subscribe(Arc::new(CommitTriggeredDispatcher::new(job_executor)));
        let hosts = HostService::new(store.clone(), events);

        Ok(Self {
            store,
            executor,
            hosts,
            display_limit: config.reconciler_display_limit,
        })
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.executor.clone(), Arc::new(self.store.clone()))
            .with_display_limit(self.display_limit)
    }
}
