use async_trait::async_trait;
use certcore::{
    ConditionOperator, ErrorHandlingStrategy, ExecutionStatus, MessagePattern, RetryPolicy,
    StepInput, Value, Worker, WorkerContext, WorkerError, WorkflowCondition,
    WorkflowDefinition, WorkflowStep,
};
use certruntime::Orchestrator;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Succeeds on every call, counting invocations
struct CountingWorker {
    id: String,
    capabilities: Vec<String>,
    calls: Arc<AtomicU32>,
}

impl CountingWorker {
    fn new(id: &str, capability: &str) -> (Arc<Self>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let worker = Arc::new(Self {
            id: id.to_string(),
            capabilities: vec![capability.to_string()],
            calls: Arc::clone(&calls),
        });
        (worker, calls)
    }
}

#[async_trait]
impl Worker for CountingWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, _input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::from("done"))
    }
}

/// Fails the first `failures` calls, then succeeds
struct FlakyWorker {
    id: String,
    capabilities: Vec<String>,
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyWorker {
    fn new(id: &str, capability: &str, failures: u32) -> (Arc<Self>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let worker = Arc::new(Self {
            id: id.to_string(),
            capabilities: vec![capability.to_string()],
            failures,
            calls: Arc::clone(&calls),
        });
        (worker, calls)
    }
}

#[async_trait]
impl Worker for FlakyWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, _input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(WorkerError::ProcessingFailed(format!("attempt {}", call)))
        } else {
            Ok(Value::from("recovered"))
        }
    }
}

/// Never resolves; stands in for a hung external service
struct StuckWorker {
    capabilities: Vec<String>,
}

impl StuckWorker {
    fn new(capability: &str) -> Arc<Self> {
        Arc::new(Self {
            capabilities: vec![capability.to_string()],
        })
    }
}

#[async_trait]
impl Worker for StuckWorker {
    fn id(&self) -> &str {
        "stuck"
    }

    fn name(&self) -> &str {
        "Stuck Worker"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, _input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

fn object(pairs: &[(&str, Value)]) -> Value {
    Value::Object(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<HashMap<_, _>>(),
    )
}

fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::fixed(max_attempts, 1)
}

#[tokio::test]
async fn conditional_step_is_skipped_without_result() {
    let orchestrator = Orchestrator::new();
    let (worker, _) = CountingWorker::new("generic", "review");
    orchestrator.registry().register(worker).await;

    let definition = WorkflowDefinition::new("certify", "Certification")
        .with_step(WorkflowStep::new("a", "review"))
        .with_step(WorkflowStep::new("b", "review").with_condition(WorkflowCondition::new(
            "overallStatus",
            ConditionOperator::Eq,
            "HALAL",
        )))
        .with_step(WorkflowStep::new("c", "review"));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("certify", object(&[("overallStatus", Value::from("HARAM"))]))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.context.results.contains_key("a"));
    assert!(!execution.context.results.contains_key("b"));
    assert!(execution.context.results.contains_key("c"));
    assert_eq!(execution.progress, 100);
}

#[tokio::test]
async fn failing_worker_is_invoked_exactly_max_attempts_times() {
    let orchestrator = Orchestrator::new();
    let (worker, calls) = FlakyWorker::new("flaky", "classify", u32::MAX);
    orchestrator.registry().register(worker).await;

    let definition = WorkflowDefinition::new("classify-wf", "Classify")
        .with_step(WorkflowStep::new("classify", "classify").with_retry(quick_retry(3)));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("classify-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(execution.context.retry_count.get("classify"), Some(&3));
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("AgentProcessingError"));
}

#[tokio::test]
async fn fallback_strategy_routes_to_fallback_step() {
    let orchestrator = Orchestrator::new();
    let (bad, bad_calls) = FlakyWorker::new("bad", "render", u32::MAX);
    let (notify, notify_calls) = CountingWorker::new("notifier", "notify");
    orchestrator.registry().register(bad).await;
    orchestrator.registry().register(notify).await;

    let definition = WorkflowDefinition::new("render-wf", "Render")
        .with_error_handling(ErrorHandlingStrategy::fallback("notify-failure"))
        .with_step(WorkflowStep::new("render", "render").with_retry(quick_retry(2)))
        .with_step(WorkflowStep::new("unreached", "notify"))
        .with_step(WorkflowStep::new("notify-failure", "notify"));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("render-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(bad_calls.load(Ordering::SeqCst), 2);
    assert_eq!(notify_calls.load(Ordering::SeqCst), 1);
    assert!(execution.context.results.contains_key("notify-failure"));
    assert!(!execution.context.results.contains_key("unreached"));
}

#[tokio::test]
async fn step_on_error_target_overrides_workflow_strategy() {
    let orchestrator = Orchestrator::new();
    let (bad, _) = FlakyWorker::new("bad", "extract", u32::MAX);
    let (recover, _) = CountingWorker::new("recoverer", "recover");
    orchestrator.registry().register(bad).await;
    orchestrator.registry().register(recover).await;

    // Strategy says stop, but the step routes its own failure.
    let definition = WorkflowDefinition::new("extract-wf", "Extract")
        .with_error_handling(ErrorHandlingStrategy::stop())
        .with_step(
            WorkflowStep::new("extract", "extract")
                .with_retry(quick_retry(1))
                .on_error("recover"),
        )
        .with_step(WorkflowStep::new("skipped", "recover"))
        .with_step(WorkflowStep::new("recover", "recover"));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("extract-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.context.results.contains_key("recover"));
    assert!(!execution.context.results.contains_key("skipped"));
    assert_eq!(execution.context.failures.len(), 1);
    assert_eq!(execution.context.failures[0].step_id, "extract");
}

#[tokio::test]
async fn skip_strategy_advances_past_failed_step() {
    let orchestrator = Orchestrator::new();
    let (bad, _) = FlakyWorker::new("bad", "verify", u32::MAX);
    let (good, _) = CountingWorker::new("good", "archive");
    orchestrator.registry().register(bad).await;
    orchestrator.registry().register(good).await;

    let definition = WorkflowDefinition::new("archive-wf", "Archive")
        .with_error_handling(ErrorHandlingStrategy::skip())
        .with_step(WorkflowStep::new("verify", "verify").with_retry(quick_retry(1)))
        .with_step(WorkflowStep::new("archive", "archive"));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("archive-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(!execution.context.results.contains_key("verify"));
    assert!(execution.context.results.contains_key("archive"));
}

#[tokio::test]
async fn workflow_retry_strategy_reruns_exhausted_step() {
    let orchestrator = Orchestrator::new();
    // Fails twice: the first round's two attempts. The second round
    // succeeds immediately.
    let (worker, calls) = FlakyWorker::new("flaky", "classify", 2);
    orchestrator.registry().register(worker).await;

    let definition = WorkflowDefinition::new("classify-wf", "Classify")
        .with_error_handling(ErrorHandlingStrategy::retry(1))
        .with_step(WorkflowStep::new("classify", "classify").with_retry(quick_retry(2)));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("classify-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(execution.context.results.contains_key("classify"));
}

#[tokio::test]
async fn unknown_workflow_is_a_structured_error() {
    let orchestrator = Orchestrator::new();
    let error = orchestrator
        .execute_workflow("unknown-id", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(error.code(), "WorkflowNotFound");
}

#[tokio::test]
async fn missing_capability_fails_the_execution() {
    let orchestrator = Orchestrator::new();
    let definition = WorkflowDefinition::new("orphan-wf", "Orphan")
        .with_step(WorkflowStep::new("lonely", "nonexistent-capability"));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("orphan-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("NoCapableAgent"));
}

#[tokio::test]
async fn overall_timeout_cancels_a_stuck_execution() {
    let orchestrator = Orchestrator::new();
    orchestrator.registry().register(StuckWorker::new("slow")).await;

    let definition = WorkflowDefinition::new("stuck-wf", "Stuck")
        .with_timeout_ms(50)
        .with_step(WorkflowStep::new("hang", "slow"));
    orchestrator.register_workflow(definition).await.unwrap();

    let started = std::time::Instant::now();
    let execution = orchestrator
        .execute_workflow("stuck-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.error.as_deref().unwrap().contains("WorkflowTimeout"));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(orchestrator.get_active_executions().await.is_empty());
    assert_eq!(orchestrator.get_completed_executions().await.len(), 1);
}

#[tokio::test]
async fn cancel_execution_flips_running_to_cancelled() {
    let orchestrator = Arc::new(Orchestrator::new());
    orchestrator.registry().register(StuckWorker::new("slow")).await;

    let definition = WorkflowDefinition::new("long-wf", "Long")
        .with_timeout_ms(60_000)
        .with_step(WorkflowStep::new("hang", "slow"));
    orchestrator.register_workflow(definition).await.unwrap();

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.execute_workflow("long-wf", Value::Null).await })
    };

    // Wait for the execution to appear in the active store.
    let execution_id = loop {
        let active = orchestrator.get_active_executions().await;
        if let Some(execution) = active.first() {
            break execution.id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    assert!(orchestrator.cancel_execution(execution_id).await);

    let execution = handle.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);

    // Already finished: a second cancel finds nothing.
    assert!(!orchestrator.cancel_execution(execution_id).await);
}

#[tokio::test]
async fn cycle_is_detected_and_fails_the_execution() {
    let orchestrator = Orchestrator::new();
    let (worker, _) = CountingWorker::new("spinner", "spin");
    orchestrator.registry().register(worker).await;

    let definition = WorkflowDefinition::new("loop-wf", "Loop")
        .with_step(WorkflowStep::new("a", "spin").on_success("b"))
        .with_step(WorkflowStep::new("b", "spin").on_success("a"));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("loop-wf", Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("WorkflowCycleDetected"));
}

#[tokio::test]
async fn completion_message_is_published_on_the_bus() {
    let orchestrator = Orchestrator::new();
    let (worker, _) = CountingWorker::new("generic", "review");
    orchestrator.registry().register(worker).await;

    let definition = WorkflowDefinition::new("certify", "Certification")
        .with_step(WorkflowStep::new("a", "review"));
    orchestrator.register_workflow(definition).await.unwrap();

    let execution = orchestrator
        .execute_workflow("certify", Value::Null)
        .await
        .unwrap();

    let completions = orchestrator
        .bus()
        .history(Some(&MessagePattern::for_type("workflow.completed")))
        .await;
    assert_eq!(completions.len(), 1);
    assert_eq!(
        completions[0].payload.lookup_path("execution_id"),
        Some(Value::String(execution.id.to_string()))
    );
    assert_eq!(
        completions[0].payload.lookup_path("status"),
        Some(Value::from("completed"))
    );
}

#[tokio::test]
async fn failed_execution_notifies_when_strategy_asks() {
    let orchestrator = Orchestrator::new();
    let (bad, _) = FlakyWorker::new("bad", "verify", u32::MAX);
    orchestrator.registry().register(bad).await;

    let definition = WorkflowDefinition::new("verify-wf", "Verify")
        .with_error_handling(ErrorHandlingStrategy::stop().notify_on_error())
        .with_step(WorkflowStep::new("verify", "verify").with_retry(quick_retry(1)));
    orchestrator.register_workflow(definition).await.unwrap();

    orchestrator
        .execute_workflow("verify-wf", Value::Null)
        .await
        .unwrap();

    let notifications = orchestrator
        .bus()
        .history(Some(&MessagePattern::for_type("workflow.failed")))
        .await;
    assert_eq!(notifications.len(), 1);
}

#[tokio::test]
async fn step_input_modes_feed_the_worker() {
    // Echo back the input so the test can observe what arrived.
    struct EchoWorker {
        capabilities: Vec<String>,
    }

    #[async_trait]
    impl Worker for EchoWorker {
        fn id(&self) -> &str {
            "echo"
        }

        fn name(&self) -> &str {
            "Echo"
        }

        fn capabilities(&self) -> &[String] {
            &self.capabilities
        }

        async fn process(&self, input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
            Ok(input)
        }
    }

    let orchestrator = Orchestrator::new();
    orchestrator
        .registry()
        .register(Arc::new(EchoWorker {
            capabilities: vec!["echo".to_string()],
        }))
        .await;

    let definition = WorkflowDefinition::new("inputs-wf", "Inputs")
        .with_step(
            WorkflowStep::new("fixed", "echo").with_input(StepInput::fixed("constant")),
        )
        .with_step(
            WorkflowStep::new("from-path", "echo")
                .with_input(StepInput::from_path("application.product")),
        );
    orchestrator.register_workflow(definition).await.unwrap();

    let input = object(&[(
        "application",
        object(&[("product", Value::from("chocolate"))]),
    )]);
    let execution = orchestrator.execute_workflow("inputs-wf", input).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(
        execution.context.results.get("fixed"),
        Some(&Value::from("constant"))
    );
    assert_eq!(
        execution.context.results.get("from-path"),
        Some(&Value::from("chocolate"))
    );
}

#[tokio::test]
async fn stats_aggregate_over_the_completed_store() {
    let orchestrator = Orchestrator::new();
    let (good, _) = CountingWorker::new("good", "ok");
    let (bad, _) = FlakyWorker::new("bad", "ko", u32::MAX);
    orchestrator.registry().register(good).await;
    orchestrator.registry().register(bad).await;

    orchestrator
        .register_workflow(
            WorkflowDefinition::new("ok-wf", "Ok").with_step(WorkflowStep::new("s", "ok")),
        )
        .await
        .unwrap();
    orchestrator
        .register_workflow(
            WorkflowDefinition::new("ko-wf", "Ko")
                .with_step(WorkflowStep::new("s", "ko").with_retry(quick_retry(1))),
        )
        .await
        .unwrap();

    orchestrator.execute_workflow("ok-wf", Value::Null).await.unwrap();
    orchestrator.execute_workflow("ko-wf", Value::Null).await.unwrap();

    let stats = orchestrator.get_stats().await;
    assert_eq!(stats.active_count, 0);
    assert_eq!(stats.completed_count, 2);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
}
