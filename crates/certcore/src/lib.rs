//! Core abstractions for the certification workflow orchestration engine
//!
//! This crate provides the fundamental types that all other components
//! depend on: the dynamic value type, the message bus, workflow
//! definitions, execution records, and the worker contract. It carries
//! no engine logic.

mod bus;
mod error;
mod execution;
mod message;
mod value;
mod worker;
mod workflow;

pub use bus::{BusEvent, MessageBus, MessageHandler, DEFAULT_HISTORY_CAPACITY};
pub use error::{BusError, OrchestratorError, WorkerError};
pub use execution::{ExecutionContext, ExecutionStatus, StepFailure, WorkflowExecution};
pub use message::{Message, MessageMetadata, MessagePattern, MessagePriority};
pub use value::Value;
pub use worker::{Worker, WorkerContext, WorkerMetrics};
pub use workflow::{
    BackoffStrategy, ConditionOperator, ErrorAction, ErrorHandlingStrategy, RetryPolicy,
    StepInput, WorkflowCondition, WorkflowDefinition, WorkflowStep,
};

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
