use crate::registry::CapabilityRegistry;
use crate::selection::SelectionCriteria;
use certcore::{
    ErrorAction, ExecutionStatus, OrchestratorError, RetryPolicy, StepInput, Value,
    WorkerContext, WorkerError, WorkflowDefinition, WorkflowExecution, WorkflowStep,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Walks a workflow's step graph strictly sequentially: conditions,
/// capability resolution, invocation with retry/backoff, transition.
///
/// Within one execution the worker call is the only suspension point;
/// concurrency exists only across executions.
pub struct StepExecutor {
    cycle_multiplier: usize,
}

impl StepExecutor {
    pub fn new(cycle_multiplier: usize) -> Self {
        Self { cycle_multiplier }
    }

    /// Run the step loop to a natural end. On `Ok` the execution has
    /// been finished as completed; an `Err` is left for the caller to
    /// finalize (failed), so routing and engine errors carry their code.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        registry: &CapabilityRegistry,
        cancellation: &CancellationToken,
        snapshot: &Arc<RwLock<WorkflowExecution>>,
    ) -> Result<(), OrchestratorError> {
        let total = definition.steps.len();
        let ceiling = total * self.cycle_multiplier;
        let mut visits = 0usize;
        let mut visited_steps: HashSet<String> = HashSet::new();
        // rounds already consumed by the workflow-level retry strategy
        let mut strategy_rounds: HashMap<String, u32> = HashMap::new();
        let mut current = Some(0usize);

        while let Some(index) = current {
            let step = &definition.steps[index];
            visits += 1;
            if visits > ceiling {
                return Err(OrchestratorError::WorkflowCycleDetected { ceiling });
            }
            execution.current_step_index = index;
            execution.context.current_step = step.id.clone();

            let mut satisfied = true;
            for condition in &step.conditions {
                if !condition.evaluate(&execution.context)? {
                    satisfied = false;
                    break;
                }
            }
            if !satisfied {
                tracing::debug!(step = %step.id, "conditions not met, skipping step");
                visited_steps.insert(step.id.clone());
                execution.progress = progress(&visited_steps, total);
                sync_snapshot(execution, snapshot).await;
                current = next_in_list(index, total);
                continue;
            }

            match self
                .invoke_step(step, execution, registry, cancellation)
                .await
            {
                Ok(output) => {
                    execution.context.record_result(&step.id, output);
                    visited_steps.insert(step.id.clone());
                    execution.progress = progress(&visited_steps, total);
                    sync_snapshot(execution, snapshot).await;
                    current = match &step.on_success {
                        Some(target) => Some(index_of(definition, target)?),
                        None => next_in_list(index, total),
                    };
                }
                Err(error) => {
                    tracing::warn!(step = %step.id, error = %error, "step failed");
                    execution.context.record_failure(&step.id, &error);
                    visited_steps.insert(step.id.clone());
                    execution.progress = progress(&visited_steps, total);
                    sync_snapshot(execution, snapshot).await;

                    // A step-local error target takes precedence over the
                    // workflow strategy.
                    if let Some(target) = &step.on_error {
                        current = Some(index_of(definition, target)?);
                        continue;
                    }

                    match &definition.error_handling.action {
                        ErrorAction::Retry { max_retries } => {
                            let rounds = strategy_rounds.entry(step.id.clone()).or_insert(0);
                            if *rounds < *max_retries {
                                *rounds += 1;
                                tracing::info!(
                                    step = %step.id,
                                    round = *rounds,
                                    "re-running step per workflow retry strategy"
                                );
                                current = Some(index);
                            } else {
                                return Err(error);
                            }
                        }
                        ErrorAction::Skip => {
                            tracing::info!(step = %step.id, "skipping failed step per strategy");
                            current = next_in_list(index, total);
                        }
                        ErrorAction::Fallback => {
                            match &definition.error_handling.fallback_step {
                                Some(target) => {
                                    tracing::info!(
                                        step = %step.id,
                                        fallback = %target,
                                        "jumping to fallback step"
                                    );
                                    current = Some(index_of(definition, target)?);
                                }
                                None => return Err(error),
                            }
                        }
                        ErrorAction::Stop => return Err(error),
                    }
                }
            }
        }

        execution.finish(ExecutionStatus::Completed, None);
        sync_snapshot(execution, snapshot).await;
        Ok(())
    }

    /// One invocation round: resolve the worker, build the input, call
    /// `process` under the step's retry policy and per-step timeout.
    /// A worker failing permanently under `max_attempts = N` is called
    /// exactly N times.
    async fn invoke_step(
        &self,
        step: &WorkflowStep,
        execution: &mut WorkflowExecution,
        registry: &CapabilityRegistry,
        cancellation: &CancellationToken,
    ) -> Result<Value, OrchestratorError> {
        let worker = registry
            .find_best(&step.capability, &SelectionCriteria::default())
            .await
            .ok_or_else(|| OrchestratorError::NoCapableAgent(step.capability.clone()))?;

        let input = match &step.input {
            StepInput::Static { value } => value.clone(),
            StepInput::FromPath { path } => {
                execution.context.lookup(path).unwrap_or(Value::Null)
            }
            StepInput::Context => execution.context.snapshot(),
        };

        let policy = step.retry.clone().unwrap_or_else(RetryPolicy::none);
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = WorkerError::ProcessingFailed("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            execution
                .context
                .retry_count
                .insert(step.id.clone(), attempt);
            let ctx = WorkerContext::new(execution.context.execution_id, step.id.clone())
                .with_cancellation(cancellation.child_token());
            tracing::debug!(
                step = %step.id,
                worker = %worker.id(),
                attempt,
                "invoking worker"
            );

            let call = worker.process(input.clone(), ctx);
            let result = match step.timeout_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), call).await {
                    Ok(result) => result,
                    Err(_) => Err(WorkerError::Timeout { ms }),
                },
                None => call.await,
            };

            match result {
                Ok(output) => return Ok(output),
                Err(error) => {
                    tracing::warn!(step = %step.id, attempt, error = %error, "attempt failed");
                    last_error = error;
                    if attempt < max_attempts {
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(OrchestratorError::AgentProcessing {
            step: step.id.clone(),
            source: last_error,
        })
    }
}

fn progress(visited: &HashSet<String>, total: usize) -> u8 {
    ((visited.len() * 100) / total.max(1)).min(100) as u8
}

fn next_in_list(index: usize, total: usize) -> Option<usize> {
    if index + 1 < total {
        Some(index + 1)
    } else {
        None
    }
}

fn index_of(definition: &WorkflowDefinition, step_id: &str) -> Result<usize, OrchestratorError> {
    definition.step_index(step_id).ok_or_else(|| {
        OrchestratorError::Validation(format!("transition target '{}' does not exist", step_id))
    })
}

async fn sync_snapshot(execution: &WorkflowExecution, snapshot: &Arc<RwLock<WorkflowExecution>>) {
    *snapshot.write().await = execution.clone();
}
