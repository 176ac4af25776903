use async_trait::async_trait;
use certcore::{Value, Worker, WorkerContext, WorkerError};

/// Parses a JSON string input into a structured value
pub struct JsonParseWorker {
    capabilities: Vec<String>,
}

impl JsonParseWorker {
    pub fn new() -> Self {
        Self {
            capabilities: vec!["transform.json-parse".to_string()],
        }
    }
}

impl Default for JsonParseWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for JsonParseWorker {
    fn id(&self) -> &str {
        "builtin.json-parse"
    }

    fn name(&self) -> &str {
        "JSON Parse Worker"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        let text = input
            .as_str()
            .ok_or_else(|| WorkerError::InvalidInput("expected a JSON string".to_string()))?;
        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| WorkerError::ProcessingFailed(format!("invalid JSON: {}", e)))?;
        Ok(Value::from_json(parsed))
    }
}

/// Serializes its input to a JSON string
pub struct JsonStringifyWorker {
    capabilities: Vec<String>,
}

impl JsonStringifyWorker {
    pub fn new() -> Self {
        Self {
            capabilities: vec!["transform.json-stringify".to_string()],
        }
    }
}

impl Default for JsonStringifyWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for JsonStringifyWorker {
    fn id(&self) -> &str {
        "builtin.json-stringify"
    }

    fn name(&self) -> &str {
        "JSON Stringify Worker"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        let text = serde_json::to_string(&input.to_json())
            .map_err(|e| WorkerError::ProcessingFailed(format!("serialization: {}", e)))?;
        Ok(Value::String(text))
    }
}
