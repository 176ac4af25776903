use crate::{ExecutionContext, OrchestratorError, Value};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Named directed graph of steps, registered once and read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub error_handling: ErrorHandlingStrategy,
    #[serde(default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_workflow_timeout_ms() -> u64 {
    300_000
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            steps: Vec::new(),
            error_handling: ErrorHandlingStrategy::default(),
            timeout_ms: default_workflow_timeout_ms(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_error_handling(mut self, strategy: ErrorHandlingStrategy) -> Self {
        self.error_handling = strategy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Structural validation: at least one step, unique step ids, and
    /// every transition target (`on_success`, `on_error`,
    /// `fallback_step`) naming a known step. Back-edges are legal —
    /// explicit transitions may loop — so a detected cycle is only
    /// logged; the runtime visit ceiling bounds traversal.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.steps.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        let check = |target: &Option<String>, kind: &str, step: &str| match target {
            Some(t) if !ids.contains(t.as_str()) => Err(OrchestratorError::Validation(format!(
                "step '{}' {} target '{}' does not exist",
                step, kind, t
            ))),
            _ => Ok(()),
        };
        for step in &self.steps {
            check(&step.on_success, "on_success", &step.id)?;
            check(&step.on_error, "on_error", &step.id)?;
        }
        if let Some(fallback) = &self.error_handling.fallback_step {
            if !ids.contains(fallback.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "fallback step '{}' does not exist",
                    fallback
                )));
            }
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let indices: HashMap<&str, _> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), graph.add_node(s.id.as_str())))
            .collect();
        for (position, step) in self.steps.iter().enumerate() {
            match &step.on_success {
                Some(target) => {
                    graph.add_edge(indices[step.id.as_str()], indices[target.as_str()], ());
                }
                None => {
                    if let Some(next) = self.steps.get(position + 1) {
                        graph.add_edge(indices[step.id.as_str()], indices[next.id.as_str()], ());
                    }
                }
            }
            if let Some(target) = &step.on_error {
                graph.add_edge(indices[step.id.as_str()], indices[target.as_str()], ());
            }
        }
        if is_cyclic_directed(&graph) {
            tracing::debug!(
                workflow = %self.id,
                "step graph contains back-edges; runtime visit ceiling bounds traversal"
            );
        }

        Ok(())
    }
}

/// One capability invocation within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub capability: String,
    #[serde(default)]
    pub input: StepInput,
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub on_error: Option<String>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            input: StepInput::default(),
            conditions: Vec::new(),
            retry: None,
            timeout_ms: None,
            on_success: None,
            on_error: None,
        }
    }

    pub fn with_input(mut self, input: StepInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_condition(mut self, condition: WorkflowCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn on_success(mut self, step_id: impl Into<String>) -> Self {
        self.on_success = Some(step_id.into());
        self
    }

    pub fn on_error(mut self, step_id: impl Into<String>) -> Self {
        self.on_error = Some(step_id.into());
        self
    }
}

/// Step input: a static payload or a pure selection from the context.
/// Tagged so definitions stay serializable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInput {
    /// Fixed payload, independent of the execution
    Static { value: Value },
    /// Value at a dotted path in the context data bag (`Null` on a miss)
    FromPath { path: String },
    /// Snapshot of the entire data bag as an object
    #[default]
    Context,
}

impl StepInput {
    pub fn fixed(value: impl Into<Value>) -> Self {
        StepInput::Static {
            value: value.into(),
        }
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        StepInput::FromPath { path: path.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    In,
    Contains,
}

/// Guard on a step: all conditions must hold or the step is skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl WorkflowCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate against the execution context. A missing field makes
    /// every operator except `Ne` false; a malformed condition (empty
    /// field, non-numeric bound for `Gt`/`Lt`, non-array for `In`) is a
    /// validation error.
    pub fn evaluate(&self, context: &ExecutionContext) -> Result<bool, OrchestratorError> {
        if self.field.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "condition field is empty".to_string(),
            ));
        }
        let actual = context.lookup(&self.field);
        match self.operator {
            ConditionOperator::Eq => Ok(actual.map_or(false, |a| a.loosely_eq(&self.value))),
            ConditionOperator::Ne => Ok(actual.map_or(true, |a| !a.loosely_eq(&self.value))),
            ConditionOperator::Gt | ConditionOperator::Lt => {
                let bound = self.value.as_f64().ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "operator on field '{}' needs a numeric value",
                        self.field
                    ))
                })?;
                Ok(actual.and_then(|a| a.as_f64()).map_or(false, |a| {
                    if self.operator == ConditionOperator::Gt {
                        a > bound
                    } else {
                        a < bound
                    }
                }))
            }
            ConditionOperator::In => match &self.value {
                Value::Array(options) => {
                    Ok(actual.map_or(false, |a| options.iter().any(|o| o.loosely_eq(&a))))
                }
                _ => Err(OrchestratorError::Validation(format!(
                    "operator 'in' on field '{}' needs an array value",
                    self.field
                ))),
            },
            ConditionOperator::Contains => Ok(actual.map_or(false, |a| match a {
                Value::String(haystack) => self
                    .value
                    .as_str()
                    .map_or(false, |needle| haystack.contains(needle)),
                Value::Array(items) => items.iter().any(|i| i.loosely_eq(&self.value)),
                _ => false,
            })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

/// Retry policy for a single step invocation round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    pub base_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::Fixed,
            base_delay_ms: 0,
            max_delay_ms: None,
        }
    }

    pub fn fixed(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Fixed,
            base_delay_ms,
            max_delay_ms: None,
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Delay before the attempt after `attempt` (1-based) failed:
    /// fixed = base, linear = attempt x base, exponential =
    /// base x 2^(attempt-1), capped at `max_delay_ms` when set.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let ms = match self.backoff {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(1u64 << (attempt - 1).min(32)),
        };
        Duration::from_millis(self.max_delay_ms.map_or(ms, |cap| ms.min(cap)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ErrorAction {
    /// Abort the execution, status failed
    Stop,
    /// Log and advance past the failed step
    Skip,
    /// Re-run the exhausted step for up to `max_retries` further rounds
    Retry { max_retries: u32 },
    /// Jump to `fallback_step`
    Fallback,
}

impl Default for ErrorAction {
    fn default() -> Self {
        ErrorAction::Stop
    }
}

/// Workflow-level reaction to a step failure, applied only after the
/// step's own retry policy is exhausted. A step's `on_error` target
/// takes precedence over this strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingStrategy {
    #[serde(default)]
    pub action: ErrorAction,
    #[serde(default)]
    pub fallback_step: Option<String>,
    #[serde(default)]
    pub notify_on_error: bool,
}

impl ErrorHandlingStrategy {
    pub fn stop() -> Self {
        Self::default()
    }

    pub fn skip() -> Self {
        Self {
            action: ErrorAction::Skip,
            ..Self::default()
        }
    }

    pub fn retry(max_retries: u32) -> Self {
        Self {
            action: ErrorAction::Retry { max_retries },
            ..Self::default()
        }
    }

    pub fn fallback(step_id: impl Into<String>) -> Self {
        Self {
            action: ErrorAction::Fallback,
            fallback_step: Some(step_id.into()),
            ..Self::default()
        }
    }

    pub fn notify_on_error(mut self) -> Self {
        self.notify_on_error = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionContext;
    use uuid::Uuid;

    fn context_with(data: Value) -> ExecutionContext {
        ExecutionContext::new("wf", Uuid::new_v4(), data)
    }

    fn object(pairs: &[(&str, Value)]) -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn eq_matches_exact_string() {
        let ctx = context_with(object(&[("overallStatus", Value::from("HALAL"))]));
        let condition =
            WorkflowCondition::new("overallStatus", ConditionOperator::Eq, "HALAL");
        assert!(condition.evaluate(&ctx).unwrap());

        let other = WorkflowCondition::new("overallStatus", ConditionOperator::Eq, "HARAM");
        assert!(!other.evaluate(&ctx).unwrap());
    }

    #[test]
    fn in_rejects_value_outside_set() {
        let ctx = context_with(object(&[("grade", Value::from("c"))]));
        let condition = WorkflowCondition::new(
            "grade",
            ConditionOperator::In,
            Value::Array(vec![Value::from("a"), Value::from("b")]),
        );
        assert!(!condition.evaluate(&ctx).unwrap());
    }

    #[test]
    fn contains_finds_substring() {
        let ctx = context_with(object(&[("ingredient", Value::from("soy lecithin"))]));
        let condition =
            WorkflowCondition::new("ingredient", ConditionOperator::Contains, "lecithin");
        assert!(condition.evaluate(&ctx).unwrap());
    }

    #[test]
    fn gt_and_lt_compare_numbers() {
        let ctx = context_with(object(&[("confidence", Value::from(0.8))]));
        assert!(WorkflowCondition::new("confidence", ConditionOperator::Gt, 0.5)
            .evaluate(&ctx)
            .unwrap());
        assert!(WorkflowCondition::new("confidence", ConditionOperator::Lt, 0.9)
            .evaluate(&ctx)
            .unwrap());
        assert!(!WorkflowCondition::new("confidence", ConditionOperator::Gt, 0.9)
            .evaluate(&ctx)
            .unwrap());
    }

    #[test]
    fn gt_with_non_numeric_bound_is_a_validation_error() {
        let ctx = context_with(object(&[("confidence", Value::from(0.8))]));
        let condition = WorkflowCondition::new("confidence", ConditionOperator::Gt, "high");
        assert!(matches!(
            condition.evaluate(&ctx),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn missing_field_is_false_except_for_ne() {
        let ctx = context_with(object(&[]));
        assert!(!WorkflowCondition::new("absent", ConditionOperator::Eq, "x")
            .evaluate(&ctx)
            .unwrap());
        assert!(WorkflowCondition::new("absent", ConditionOperator::Ne, "x")
            .evaluate(&ctx)
            .unwrap());
    }

    #[test]
    fn backoff_delays() {
        let fixed = RetryPolicy::fixed(3, 100);
        assert_eq!(fixed.delay_for(1).as_millis(), 100);
        assert_eq!(fixed.delay_for(3).as_millis(), 100);

        let linear = RetryPolicy {
            max_attempts: 4,
            backoff: BackoffStrategy::Linear,
            base_delay_ms: 100,
            max_delay_ms: None,
        };
        assert_eq!(linear.delay_for(1).as_millis(), 100);
        assert_eq!(linear.delay_for(3).as_millis(), 300);

        let exponential = RetryPolicy {
            max_attempts: 5,
            backoff: BackoffStrategy::Exponential,
            base_delay_ms: 100,
            max_delay_ms: Some(350),
        };
        assert_eq!(exponential.delay_for(1).as_millis(), 100);
        assert_eq!(exponential.delay_for(2).as_millis(), 200);
        // base * 2^2 = 400, capped at 350
        assert_eq!(exponential.delay_for(3).as_millis(), 350);
    }

    #[test]
    fn validate_rejects_unknown_transition_target() {
        let definition = WorkflowDefinition::new("wf", "Workflow")
            .with_step(WorkflowStep::new("a", "cap").on_success("ghost"));
        assert!(matches!(
            definition.validate(),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_duplicate_step_ids() {
        let definition = WorkflowDefinition::new("wf", "Workflow")
            .with_step(WorkflowStep::new("a", "cap"))
            .with_step(WorkflowStep::new("a", "cap"));
        assert!(matches!(
            definition.validate(),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn validate_accepts_backward_edges() {
        let definition = WorkflowDefinition::new("wf", "Workflow")
            .with_step(WorkflowStep::new("a", "cap"))
            .with_step(WorkflowStep::new("b", "cap").on_success("a"));
        assert!(definition.validate().is_ok());
    }
}
