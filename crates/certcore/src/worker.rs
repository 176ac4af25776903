use crate::{Value, WorkerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-invocation context handed to a worker
#[derive(Clone)]
pub struct WorkerContext {
    pub execution_id: Uuid,
    pub step_id: String,

    /// Fires when the owning execution is cancelled or times out.
    /// Well-behaved workers return `WorkerError::Cancelled` promptly;
    /// results from workers that complete anyway are discarded.
    pub cancellation: CancellationToken,
}

impl WorkerContext {
    pub fn new(execution_id: Uuid, step_id: impl Into<String>) -> Self {
        Self {
            execution_id,
            step_id: step_id.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Point-in-time processing statistics a worker may expose
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub messages_processed: u64,
    pub avg_processing_time_ms: f64,
    pub success_rate: f64,
}

/// Contract every registered worker implements. The orchestrator is
/// agnostic to the business logic behind `process`.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identity within the registry
    fn id(&self) -> &str;

    /// Human-readable display name
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Capability names this worker advertises, in declaration order
    fn capabilities(&self) -> &[String];

    /// Perform the work for one step invocation
    async fn process(&self, input: Value, ctx: WorkerContext) -> Result<Value, WorkerError>;

    /// Health probe; a worker without a meaningful probe is healthy
    async fn health_check(&self) -> Result<bool, WorkerError> {
        Ok(true)
    }

    /// Invoked asynchronously after the worker is unregistered
    async fn shutdown(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    fn metrics(&self) -> Option<WorkerMetrics> {
        None
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|c| c == capability)
    }
}
