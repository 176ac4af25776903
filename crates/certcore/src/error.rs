use thiserror::Error;

/// Failures surfaced by a worker's `process` call
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("cancelled")]
    Cancelled,
}

/// Engine and routing level failures
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("no registered worker provides capability '{0}'")]
    NoCapableAgent(String),

    #[error("step '{step}' failed: {source}")]
    AgentProcessing {
        step: String,
        #[source]
        source: WorkerError,
    },

    #[error("workflow timed out after {ms}ms")]
    WorkflowTimeout { ms: u64 },

    #[error("step visit ceiling of {ceiling} exceeded, aborting probable cycle")]
    WorkflowCycleDetected { ceiling: usize },

    #[error("invalid definition: {0}")]
    Validation(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl OrchestratorError {
    /// Stable machine-readable code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::WorkflowNotFound(_) => "WorkflowNotFound",
            OrchestratorError::NoCapableAgent(_) => "NoCapableAgent",
            OrchestratorError::AgentProcessing { .. } => "AgentProcessingError",
            OrchestratorError::WorkflowTimeout { .. } => "WorkflowTimeout",
            OrchestratorError::WorkflowCycleDetected { .. } => "WorkflowCycleDetected",
            OrchestratorError::Validation(_) => "ValidationError",
            OrchestratorError::Delivery(_) => "DeliveryError",
        }
    }
}

/// Failures of the bus's correlated request/response path
#[derive(Error, Debug)]
pub enum BusError {
    #[error("no response within {ms}ms")]
    ResponseTimeout { ms: u64 },

    #[error("response channel closed")]
    ChannelClosed,
}
