//! Built-in worker library
//!
//! Utility workers exercising the worker contract: echo, delay, JSON
//! transforms, and HTTP notification. Business workers register through
//! the same `Worker` trait from outside this workspace.

mod debug;
mod http;
mod time;
mod transform;

pub use debug::EchoWorker;
pub use http::HttpNotifyWorker;
pub use time::DelayWorker;
pub use transform::{JsonParseWorker, JsonStringifyWorker};

use certruntime::CapabilityRegistry;
use std::sync::Arc;

/// Register all built-in workers
pub async fn register_all(registry: &CapabilityRegistry) {
    registry.register(Arc::new(EchoWorker::new())).await;
    registry.register(Arc::new(DelayWorker::new())).await;
    registry.register(Arc::new(JsonParseWorker::new())).await;
    registry.register(Arc::new(JsonStringifyWorker::new())).await;
    registry.register(Arc::new(HttpNotifyWorker::new())).await;
}
