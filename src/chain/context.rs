use tokio_util::sync::CancellationToken;

/// Context handed to a stage while it runs.
#[derive(Clone)]
pub struct StageContext {
    /// Id of the chain this stage belongs to.
    pub chain_id: String,

    /// Zero-based position of the stage within its chain.
    pub stage_index: usize,

    /// Cancelled when the executor shuts down.
    pub cancellation_token: CancellationToken,
}

impl StageContext {
    pub fn new(chain_id: String, stage_index: usize, cancellation_token: CancellationToken) -> Self {
        Self {
            chain_id,
            stage_index,
            cancellation_token,
        }
    }

    /// Long-running stages should poll this and return `JobError::Cancelled` when set.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
