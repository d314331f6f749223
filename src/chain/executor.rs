use super::context::StageContext;
use super::stage::{ChainStage, JobError};
use super::{ChainId, ChainRequest, JobExecutor, StageDescriptor};
use crate::metrics;
use crate::store::{RunStore, StageRunStatus};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Runs chains on a tokio runtime, one stage at a time, recording every stage run.
pub struct LocalChainExecutor {
    stages: RwLock<HashMap<String, Arc<dyn ChainStage>>>,
    run_store: Arc<dyn RunStore>,
    runtime: Handle,
    tracker: TaskTracker,
    shutdown_token: CancellationToken,
    /// Serializes the close/wait/reopen sequences of `wait_idle` and `shutdown`.
    idle_lock: tokio::sync::Mutex<()>,
}

struct ResolvedChain {
    chain_id: ChainId,
    triggered_by: String,
    stages: Vec<(Arc<dyn ChainStage>, StageDescriptor)>,
}

impl LocalChainExecutor {
    /// Runs still marked running that started more than `stale_after` ago are failed
    /// here, as left over from an interrupted process.
    pub fn new(runtime: Handle, run_store: Arc<dyn RunStore>, stale_after: Duration) -> Self {
        let started_before = chrono::Duration::from_std(stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match run_store.mark_stale_runs_failed(started_before) {
            Ok(0) => {}
            Ok(count) => info!("Marked {} stale stage runs as failed from previous run", count),
            Err(e) => error!("Failed to mark stale stage runs: {}", e),
        }
        Self {
            stages: RwLock::new(HashMap::new()),
            run_store,
            runtime,
            tracker: TaskTracker::new(),
            shutdown_token: CancellationToken::new(),
            idle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Make `stage` available to chains under its name, replacing any previous stage
    /// with the same name.
    pub fn register_stage(&self, stage: Arc<dyn ChainStage>) {
        info!("Registering stage: {} - {}", stage.name(), stage.description());
        if let Ok(mut stages) = self.stages.write() {
            stages.insert(stage.name().to_string(), stage);
        }
    }

    /// Every registered stage, sorted by name.
    pub fn stages(&self) -> Vec<Arc<dyn ChainStage>> {
        let mut stages: Vec<Arc<dyn ChainStage>> = match self.stages.read() {
            Ok(stages) => stages.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        stages.sort_by_key(|stage| stage.name());
        stages
    }

    fn resolve(&self, chain: ChainRequest) -> Result<ResolvedChain, JobError> {
        if chain.stages.is_empty() {
            return Err(JobError::EmptyChain);
        }
        let registered = self
            .stages
            .read()
            .map_err(|_| JobError::ExecutionFailed("stage table poisoned".to_string()))?;
        let stages = chain
            .stages
            .into_iter()
            .map(|descriptor| match registered.get(&descriptor.stage_name) {
                Some(stage) => Ok((stage.clone(), descriptor)),
                None => Err(JobError::NotFound(descriptor.stage_name)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResolvedChain {
            chain_id: uuid::Uuid::new_v4().to_string(),
            triggered_by: chain.triggering_entity_id,
            stages,
        })
    }

    /// Wait until every submitted chain has finished.
    pub async fn wait_idle(&self) {
        let _idle = self.idle_lock.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        if !self.shutdown_token.is_cancelled() {
            self.tracker.reopen();
        }
    }

    /// Cancel running chains and wait for them to stop. Later submissions are rejected.
    pub async fn shutdown(&self) {
        info!("Shutting down chain executor...");
        self.shutdown_token.cancel();
        let drained = async {
            let _idle = self.idle_lock.lock().await;
            self.tracker.close();
            self.tracker.wait().await;
        };
        if tokio::time::timeout(Duration::from_secs(30), drained)
            .await
            .is_err()
        {
            warn!(
                "{} chains still running after shutdown timeout",
                self.tracker.len()
            );
        }
        info!("Chain executor shutdown complete");
    }
}

impl JobExecutor for LocalChainExecutor {
    fn submit_chain(&self, chain: ChainRequest) -> Result<ChainId, JobError> {
        if self.shutdown_token.is_cancelled() {
            return Err(JobError::ShuttingDown);
        }
        let resolved = self.resolve(chain)?;
        let chain_id = resolved.chain_id.clone();
        info!(
            "Submitting chain {} ({} stages) triggered by {}",
            chain_id,
            resolved.stages.len(),
            resolved.triggered_by
        );

        let run_store = self.run_store.clone();
        let token = self.shutdown_token.child_token();
        self.runtime
            .spawn(self.tracker.track_future(run_chain(resolved, run_store, token)));
        Ok(chain_id)
    }
}

async fn run_chain(chain: ResolvedChain, run_store: Arc<dyn RunStore>, token: CancellationToken) {
    let ResolvedChain {
        chain_id,
        triggered_by,
        stages,
    } = chain;
    let total = stages.len();
    let mut previous: Option<JsonValue> = None;

    for (index, (stage, descriptor)) in stages.into_iter().enumerate() {
        let stage_name = descriptor.stage_name;
        if token.is_cancelled() {
            info!(
                "Chain {} cancelled before stage {} ({})",
                chain_id, index, stage_name
            );
            return;
        }

        let mut args = descriptor.arguments;
        if let Some(result) = previous.take() {
            args.insert(0, result);
        }

        let run_id = match run_store.record_stage_start(&chain_id, index, &stage_name, &triggered_by)
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    "Failed to record start of stage {} in chain {}: {}",
                    stage_name, chain_id, e
                );
                None
            }
        };

        debug!("Chain {} running stage {} ({})", chain_id, index, stage_name);
        let ctx = StageContext::new(chain_id.clone(), index, token.clone());
        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || stage.run(&ctx, args)).await;
        let elapsed = start.elapsed();

        let (status, error_message, label) = match result {
            Ok(Ok(value)) => {
                info!(
                    "Chain {} stage {} ({}) completed in {:?}",
                    chain_id, index, stage_name, elapsed
                );
                previous = Some(value);
                (StageRunStatus::Completed, None, "success")
            }
            Ok(Err(JobError::Cancelled)) => {
                info!(
                    "Chain {} stage {} ({}) was cancelled after {:?}",
                    chain_id, index, stage_name, elapsed
                );
                (
                    StageRunStatus::Failed,
                    Some("Cancelled".to_string()),
                    "cancelled",
                )
            }
            Ok(Err(e)) => {
                error!(
                    "Chain {} stage {} ({}) failed after {:?}: {}",
                    chain_id, index, stage_name, elapsed, e
                );
                (StageRunStatus::Failed, Some(e.to_string()), "failed")
            }
            Err(e) => {
                error!(
                    "Chain {} stage {} ({}) panicked after {:?}: {}",
                    chain_id, index, stage_name, elapsed, e
                );
                (
                    StageRunStatus::Failed,
                    Some(format!("Task panic: {}", e)),
                    "panic",
                )
            }
        };
        metrics::record_stage_execution(&stage_name, label, elapsed);

        if let Some(run_id) = run_id {
            if let Err(e) = run_store.record_stage_finish(run_id, status, error_message) {
                error!(
                    "Failed to record finish of stage {} in chain {}: {}",
                    stage_name, chain_id, e
                );
            }
        }

        if status != StageRunStatus::Completed {
            warn!(
                "Chain {} stopped at stage {} of {}; remaining stages skipped",
                chain_id,
                index + 1,
                total
            );
            return;
        }
    }

    info!("Chain {} completed all {} stages", chain_id, total);
}
