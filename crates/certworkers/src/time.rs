use async_trait::async_trait;
use certcore::{Value, Worker, WorkerContext, WorkerError};
use tokio::time::{sleep, Duration};

/// Delays for `delay_ms` from its input, then passes the input through.
/// Returns `Cancelled` promptly when the execution is cancelled mid-wait.
pub struct DelayWorker {
    capabilities: Vec<String>,
}

impl DelayWorker {
    pub fn new() -> Self {
        Self {
            capabilities: vec!["time.delay".to_string()],
        }
    }
}

impl Default for DelayWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for DelayWorker {
    fn id(&self) -> &str {
        "builtin.delay"
    }

    fn name(&self) -> &str {
        "Delay Worker"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, input: Value, ctx: WorkerContext) -> Result<Value, WorkerError> {
        let delay_ms = input
            .lookup_path("delay_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(1000.0) as u64;

        tracing::debug!(step = %ctx.step_id, delay_ms, "delaying");

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(input),
            _ = ctx.cancellation.cancelled() => Err(WorkerError::Cancelled),
        }
    }
}
