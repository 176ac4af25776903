use crate::executor::StepExecutor;
use crate::registry::CapabilityRegistry;
use certcore::{
    BusEvent, ExecutionStatus, Message, MessageBus, MessagePriority, OrchestratorError, Value,
    WorkflowDefinition, WorkflowExecution,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Completed-execution store capacity; oldest entries are evicted
    pub max_completed: usize,
    /// Visit ceiling per execution = step count x this multiplier
    pub cycle_multiplier: usize,
    /// Message bus history ring capacity
    pub history_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_completed: 100,
            cycle_multiplier: 10,
            history_capacity: certcore::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Aggregate view over the execution stores
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationStats {
    pub active_count: usize,
    pub completed_count: usize,
    pub avg_execution_time_ms: f64,
    pub success_rate: f64,
}

struct ActiveExecution {
    snapshot: Arc<RwLock<WorkflowExecution>>,
    cancellation: CancellationToken,
}

enum RunOutcome {
    Finished(Result<(), OrchestratorError>),
    Cancelled,
    TimedOut,
}

/// Executes registered workflow definitions against registered workers.
///
/// Owns the capability registry, the message bus, the definition store,
/// and the active/completed execution stores. Single-process,
/// best-effort: execution state does not survive a restart.
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<MessageBus>,
    executor: StepExecutor,
    definitions: RwLock<HashMap<String, WorkflowDefinition>>,
    active: RwLock<HashMap<Uuid, ActiveExecution>>,
    completed: RwLock<VecDeque<WorkflowExecution>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        let bus = Arc::new(MessageBus::new(config.history_capacity));
        Self::with_parts(registry, bus, config)
    }

    /// Build from pre-configured collaborators (e.g. a registry with a
    /// non-default selection policy).
    pub fn with_parts(
        registry: Arc<CapabilityRegistry>,
        bus: Arc<MessageBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            executor: StepExecutor::new(config.cycle_multiplier),
            definitions: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(VecDeque::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Validate and store a definition. Re-registering an id silently
    /// overwrites the previous definition.
    pub async fn register_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<(), OrchestratorError> {
        definition.validate()?;
        tracing::info!(
            workflow = %definition.id,
            steps = definition.steps.len(),
            "registering workflow"
        );
        self.definitions
            .write()
            .await
            .insert(definition.id.clone(), definition);
        Ok(())
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.definitions.read().await.get(workflow_id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.definitions.read().await.values().cloned().collect()
    }

    /// Execute a workflow to a terminal status.
    ///
    /// Returns `Err(WorkflowNotFound)` for an unknown id; every other
    /// outcome - including step failures, cycle aborts, and
    /// timeout/cancellation - is a normal completion carried in the
    /// returned execution's status and error fields. The execution is
    /// always moved to the completed store and a `workflow.completed`
    /// message is published.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let definition = self
            .definitions
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut execution = WorkflowExecution::new(&definition.id, input);
        execution.start();
        let cancellation = CancellationToken::new();
        let snapshot = Arc::new(RwLock::new(execution.clone()));
        self.active.write().await.insert(
            execution.id,
            ActiveExecution {
                snapshot: Arc::clone(&snapshot),
                cancellation: cancellation.clone(),
            },
        );

        tracing::info!(
            workflow = %definition.id,
            execution = %execution.id,
            "starting execution"
        );

        // The deadline and the cancellation token race the step loop.
        // Neither preempts an in-flight worker call's task; losing the
        // race drops the loop future, so a straggler's result is never
        // merged into the terminal execution.
        let outcome = tokio::select! {
            result = self.executor.run(
                &definition,
                &mut execution,
                &self.registry,
                &cancellation,
                &snapshot,
            ) => RunOutcome::Finished(result),
            _ = cancellation.cancelled() => RunOutcome::Cancelled,
            _ = tokio::time::sleep(Duration::from_millis(definition.timeout_ms)) => {
                RunOutcome::TimedOut
            }
        };

        match outcome {
            RunOutcome::Finished(Ok(())) => {}
            RunOutcome::Finished(Err(error)) => {
                tracing::warn!(
                    execution = %execution.id,
                    code = error.code(),
                    error = %error,
                    "execution failed"
                );
                execution.finish(
                    ExecutionStatus::Failed,
                    Some(format!("{}: {}", error.code(), error)),
                );
            }
            RunOutcome::Cancelled => {
                execution.finish(
                    ExecutionStatus::Cancelled,
                    Some("execution cancelled".to_string()),
                );
            }
            RunOutcome::TimedOut => {
                cancellation.cancel();
                let error = OrchestratorError::WorkflowTimeout {
                    ms: definition.timeout_ms,
                };
                execution.finish(
                    ExecutionStatus::Cancelled,
                    Some(format!("{}: {}", error.code(), error)),
                );
            }
        }

        self.finalize(&definition, execution.clone(), &snapshot).await;
        Ok(execution)
    }

    async fn finalize(
        &self,
        definition: &WorkflowDefinition,
        execution: WorkflowExecution,
        snapshot: &Arc<RwLock<WorkflowExecution>>,
    ) {
        *snapshot.write().await = execution.clone();
        self.active.write().await.remove(&execution.id);
        {
            let mut completed = self.completed.write().await;
            if completed.len() >= self.config.max_completed {
                completed.pop_front();
            }
            completed.push_back(execution.clone());
        }

        let duration_ms = execution.duration_ms.unwrap_or(0);
        let mut payload = HashMap::new();
        payload.insert(
            "execution_id".to_string(),
            Value::String(execution.id.to_string()),
        );
        payload.insert(
            "workflow_id".to_string(),
            Value::String(execution.workflow_id.clone()),
        );
        payload.insert(
            "status".to_string(),
            Value::String(execution.status.to_string()),
        );
        payload.insert("duration_ms".to_string(), Value::Number(duration_ms as f64));
        payload.insert(
            "results".to_string(),
            Value::Object(execution.context.results.clone()),
        );
        self.bus
            .publish(Message::new(
                "workflow.completed",
                Value::Object(payload),
                "orchestrator",
            ))
            .await;
        self.bus.emit(BusEvent::WorkflowCompleted {
            execution_id: execution.id,
            workflow_id: execution.workflow_id.clone(),
            status: execution.status.to_string(),
            duration_ms,
            timestamp: Utc::now(),
        });

        if execution.status == ExecutionStatus::Failed
            && definition.error_handling.notify_on_error
        {
            let mut payload = HashMap::new();
            payload.insert(
                "execution_id".to_string(),
                Value::String(execution.id.to_string()),
            );
            payload.insert(
                "workflow_id".to_string(),
                Value::String(execution.workflow_id.clone()),
            );
            payload.insert(
                "error".to_string(),
                Value::String(execution.error.clone().unwrap_or_default()),
            );
            self.bus
                .publish(
                    Message::new("workflow.failed", Value::Object(payload), "orchestrator")
                        .with_priority(MessagePriority::High),
                )
                .await;
        }

        tracing::info!(
            execution = %execution.id,
            status = %execution.status,
            duration_ms,
            "execution finished"
        );
    }

    /// Request cancellation of a running execution. Returns false for
    /// an unknown or already finished execution.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> bool {
        let active = self.active.read().await;
        match active.get(&execution_id) {
            Some(entry) => {
                tracing::info!(execution = %execution_id, "cancellation requested");
                entry.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn get_active_executions(&self) -> Vec<WorkflowExecution> {
        let active = self.active.read().await;
        let mut executions = Vec::with_capacity(active.len());
        for entry in active.values() {
            executions.push(entry.snapshot.read().await.clone());
        }
        executions
    }

    pub async fn get_completed_executions(&self) -> Vec<WorkflowExecution> {
        self.completed.read().await.iter().cloned().collect()
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        if let Some(entry) = self.active.read().await.get(&execution_id) {
            return Some(entry.snapshot.read().await.clone());
        }
        self.completed
            .read()
            .await
            .iter()
            .find(|e| e.id == execution_id)
            .cloned()
    }

    pub async fn get_stats(&self) -> OrchestrationStats {
        let active_count = self.active.read().await.len();
        let completed = self.completed.read().await;
        let completed_count = completed.len();
        let (avg_execution_time_ms, success_rate) = if completed_count == 0 {
            (0.0, 0.0)
        } else {
            let total_ms: u64 = completed.iter().filter_map(|e| e.duration_ms).sum();
            let succeeded = completed.iter().filter(|e| e.succeeded()).count();
            (
                total_ms as f64 / completed_count as f64,
                succeeded as f64 / completed_count as f64,
            )
        };
        OrchestrationStats {
            active_count,
            completed_count,
            avg_execution_time_ms,
            success_rate,
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
