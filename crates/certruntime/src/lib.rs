//! Workflow orchestration runtime
//!
//! This crate provides the capability registry that tracks workers, the
//! step executor that walks a workflow's graph, and the orchestrator
//! facade that owns definitions and execution stores.

mod executor;
mod orchestrator;
mod registry;
mod selection;

pub use executor::StepExecutor;
pub use orchestrator::{OrchestrationStats, Orchestrator, OrchestratorConfig};
pub use registry::{CapabilityRegistry, WorkerHealth};
pub use selection::{RegistrationOrder, RoundRobin, SelectionCriteria, SelectionPolicy};
