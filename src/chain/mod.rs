//! Ordered chains of stages, each stage fed with the result of the previous one.

mod context;
mod executor;
mod stage;

pub use context::StageContext;
pub use executor::LocalChainExecutor;
pub use stage::{i64_arg, value_arg, ChainStage, JobError, StageKind};

use serde::Serialize;
use serde_json::Value as JsonValue;

pub type ChainId = String;

/// One link of a chain: the stage to run and its fixed arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDescriptor {
    pub stage_name: String,
    pub arguments: Vec<JsonValue>,
}

impl StageDescriptor {
    pub fn new(stage_name: impl Into<String>, arguments: Vec<JsonValue>) -> Self {
        Self {
            stage_name: stage_name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainRequest {
    /// Label of the entity whose change caused this chain, e.g. `analyzer_host:3`.
    pub triggering_entity_id: String,
    pub stages: Vec<StageDescriptor>,
}

impl ChainRequest {
    pub fn new(triggering_entity_id: impl Into<String>) -> Self {
        Self {
            triggering_entity_id: triggering_entity_id.into(),
            stages: Vec::new(),
        }
    }

    pub fn then(mut self, stage_name: impl Into<String>, arguments: Vec<JsonValue>) -> Self {
        self.stages.push(StageDescriptor::new(stage_name, arguments));
        self
    }
}

/// Anything that accepts chains for asynchronous execution.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait JobExecutor: Send + Sync {
    /// Queue `chain` and return its id. Returns before any stage runs.
    fn submit_chain(&self, chain: ChainRequest) -> Result<ChainId, JobError>;
}
