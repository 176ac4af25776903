use anyhow::Result;
use certcore::{
    BusEvent, ConditionOperator, ErrorHandlingStrategy, RetryPolicy, StepInput, Value,
    WorkflowCondition, WorkflowDefinition, WorkflowStep,
};
use certruntime::Orchestrator;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cert")]
#[command(about = "Certification workflow orchestrator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition file
    Run {
        /// Path to workflow definition JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow definition file
    Validate {
        /// Path to workflow definition JSON file
        file: PathBuf,
    },

    /// List built-in workers and their capabilities
    Workers,

    /// Create an example workflow definition
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            verbose,
        } => {
            let level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
                )
                .init();

            run_workflow(file, input).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Workers => {
            list_workers().await;
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

async fn run_workflow(file: PathBuf, input: Option<String>) -> Result<()> {
    println!("Loading workflow from: {}", file.display());

    let definition_json = std::fs::read_to_string(&file)?;
    let definition: WorkflowDefinition = serde_json::from_str(&definition_json)?;

    println!("Workflow: {}", definition.name);
    println!("   Steps: {}", definition.steps.len());
    println!();

    let input = match input {
        Some(text) => Value::from_json(serde_json::from_str(&text)?),
        None => Value::Null,
    };

    let orchestrator = Arc::new(Orchestrator::new());
    certworkers::register_all(orchestrator.registry()).await;

    let workflow_id = definition.id.clone();
    orchestrator.register_workflow(definition).await?;

    // Stream lifecycle events while the execution runs.
    let mut events = orchestrator.bus().subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BusEvent::MessagePublished { message_type, .. } => {
                    println!("  event: {}", message_type);
                }
                BusEvent::DeliveryError { worker_id, error, .. } => {
                    println!("  delivery error [{}]: {}", worker_id, error);
                }
                BusEvent::WorkflowCompleted {
                    status,
                    duration_ms,
                    ..
                } => {
                    println!("  workflow {} in {}ms", status, duration_ms);
                }
                _ => {}
            }
        }
    });

    let execution = orchestrator.execute_workflow(&workflow_id, input).await?;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("Execution Summary:");
    println!("   Execution ID: {}", execution.id);
    println!("   Status: {}", execution.status);
    println!("   Progress: {}%", execution.progress);
    if let Some(duration_ms) = execution.duration_ms {
        println!("   Duration: {}ms", duration_ms);
    }
    if let Some(error) = &execution.error {
        println!("   Error: {}", error);
    }

    if !execution.context.results.is_empty() {
        println!();
        println!("Step results:");
        for (step_id, result) in &execution.context.results {
            println!("   {}: {}", step_id, serde_json::to_string(&result.to_json())?);
        }
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("Validating workflow: {}", file.display());

    let definition_json = std::fs::read_to_string(&file)?;
    let definition: WorkflowDefinition = serde_json::from_str(&definition_json)?;
    definition.validate()?;

    println!("Workflow is valid:");
    println!("   Name: {}", definition.name);
    println!("   Steps: {}", definition.steps.len());
    println!("   Timeout: {}ms", definition.timeout_ms);

    Ok(())
}

async fn list_workers() {
    println!("Built-in workers:");
    println!();

    let orchestrator = Orchestrator::new();
    certworkers::register_all(orchestrator.registry()).await;

    for worker in orchestrator.registry().get_all().await {
        println!(
            "  - {} v{} ({})",
            worker.id(),
            worker.version(),
            worker.name()
        );
        for capability in worker.capabilities() {
            println!("      capability: {}", capability);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let definition = WorkflowDefinition::new("example-certification", "Example Certification")
        .with_description("Echo the application, then notify on failure")
        .with_error_handling(ErrorHandlingStrategy::fallback("notify-failure"))
        .with_timeout_ms(30_000)
        .with_step(
            WorkflowStep::new("review", "debug.echo")
                .with_retry(RetryPolicy::fixed(3, 500))
                .with_condition(WorkflowCondition::new(
                    "application",
                    ConditionOperator::Ne,
                    Value::Null,
                )),
        )
        .with_step(
            WorkflowStep::new("pause", "time.delay")
                .with_input(StepInput::fixed(serde_json::json!({"delay_ms": 250}))),
        )
        .with_step(WorkflowStep::new("notify-failure", "debug.echo"));

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(&output, json)?;

    println!("Example workflow written to: {}", output.display());
    println!("Run it with: cert run --file {}", output.display());

    Ok(())
}
