use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state threaded through one execution: the data bag seeded
/// from the caller's input, per-step results, failures, retry counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub current_step: String,
    pub data: HashMap<String, Value>,
    pub results: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub failures: Vec<StepFailure>,
    pub retry_count: HashMap<String, u32>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, execution_id: Uuid, input: Value) -> Self {
        let data = match input {
            Value::Object(map) => map,
            Value::Null => HashMap::new(),
            other => {
                let mut map = HashMap::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            current_step: String::new(),
            data,
            results: HashMap::new(),
            started_at: Utc::now(),
            failures: Vec::new(),
            retry_count: HashMap::new(),
        }
    }

    /// Dotted-path lookup over the data bag. Step results are reachable
    /// under `results.<step id>`.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let mut current = self.data.get(segments.next()?)?.clone();
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?.clone(),
                Value::Json(json) => Value::from_json(json.get(segment)?.clone()),
                _ => return None,
            };
        }
        Some(current)
    }

    /// Record a step's output in the results map and merge it into the
    /// data bag under `results.<step id>`.
    pub fn record_result(&mut self, step_id: &str, value: Value) {
        self.results.insert(step_id.to_string(), value.clone());
        let results = self
            .data
            .entry("results".to_string())
            .or_insert_with(|| Value::Object(HashMap::new()));
        if let Value::Object(map) = results {
            map.insert(step_id.to_string(), value);
        }
    }

    pub fn record_failure(&mut self, step_id: &str, error: impl fmt::Display) {
        self.failures.push(StepFailure {
            step_id: step_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Whole data bag as a single object value.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

/// One run of a workflow against a specific input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub context: ExecutionContext,
    pub current_step_index: usize,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, input: Value) -> Self {
        let workflow_id = workflow_id.into();
        let id = Uuid::new_v4();
        let context = ExecutionContext::new(workflow_id.clone(), id, input);
        Self {
            id,
            workflow_id,
            status: ExecutionStatus::Pending,
            context,
            current_step_index: 0,
            progress: 0,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == ExecutionStatus::Pending {
            self.status = ExecutionStatus::Running;
        }
    }

    /// Transition to a terminal status. Returns false (and changes
    /// nothing) if the execution is already terminal: an execution is
    /// terminal exactly once, so a straggling result can never
    /// overwrite an earlier cancellation or failure.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error;
        let finished = Utc::now();
        self.finished_at = Some(finished);
        self.duration_ms = Some((finished - self.started_at).num_milliseconds().max(0) as u64);
        if status != ExecutionStatus::Cancelled {
            self.progress = 100;
        }
        true
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}
