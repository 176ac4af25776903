use async_trait::async_trait;
use certcore::{Value, Worker, WorkerContext, WorkerError};

/// Logs its input and echoes it back unchanged
pub struct EchoWorker {
    capabilities: Vec<String>,
}

impl EchoWorker {
    pub fn new() -> Self {
        Self {
            capabilities: vec!["debug.echo".to_string()],
        }
    }
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for EchoWorker {
    fn id(&self) -> &str {
        "builtin.echo"
    }

    fn name(&self) -> &str {
        "Echo Worker"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, input: Value, ctx: WorkerContext) -> Result<Value, WorkerError> {
        tracing::info!(
            execution = %ctx.execution_id,
            step = %ctx.step_id,
            input = ?input,
            "echo"
        );
        Ok(input)
    }
}
