use async_trait::async_trait;
use certcore::{Value, Worker, WorkerContext, WorkerError};

/// POSTs a notification payload to a URL taken from its input object
/// (`{"url": ..., "payload": ...}`).
pub struct HttpNotifyWorker {
    client: reqwest::Client,
    capabilities: Vec<String>,
}

impl HttpNotifyWorker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            capabilities: vec!["http.notify".to_string()],
        }
    }
}

impl Default for HttpNotifyWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for HttpNotifyWorker {
    fn id(&self) -> &str {
        "builtin.http-notify"
    }

    fn name(&self) -> &str {
        "HTTP Notify Worker"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, input: Value, ctx: WorkerContext) -> Result<Value, WorkerError> {
        let url = input
            .lookup_path("url")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| WorkerError::InvalidInput("missing 'url'".to_string()))?;
        let payload = input.lookup_path("payload").unwrap_or(Value::Null);

        tracing::info!(step = %ctx.step_id, url = %url, "posting notification");

        let response = tokio::select! {
            result = self.client.post(&url).json(&payload.to_json()).send() => result
                .map_err(|e| WorkerError::ProcessingFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(WorkerError::Cancelled),
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(WorkerError::ProcessingFailed(format!(
                "notification endpoint returned {}",
                status
            )));
        }

        let mut output = std::collections::HashMap::new();
        output.insert("status".to_string(), Value::Number(status as f64));
        Ok(Value::Object(output))
    }
}
