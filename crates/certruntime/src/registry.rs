use crate::selection::{RegistrationOrder, SelectionCriteria, SelectionPolicy};
use certcore::Worker;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of one worker's health probe
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tracks registered workers and resolves capabilities to a worker.
///
/// Workers are kept in registration order; every lookup is a linear
/// scan over that order, which keeps selection deterministic.
pub struct CapabilityRegistry {
    workers: RwLock<Vec<Arc<dyn Worker>>>,
    policy: Box<dyn SelectionPolicy>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::with_policy(Box::new(RegistrationOrder))
    }

    pub fn with_policy(policy: Box<dyn SelectionPolicy>) -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            policy,
        }
    }

    /// Register a worker. A duplicate id replaces the prior
    /// registration in place, preserving its position.
    pub async fn register(&self, worker: Arc<dyn Worker>) {
        let mut workers = self.workers.write().await;
        if let Some(existing) = workers.iter_mut().find(|w| w.id() == worker.id()) {
            tracing::warn!(worker = %worker.id(), "replacing existing registration");
            *existing = worker;
        } else {
            tracing::info!(
                worker = %worker.id(),
                capabilities = ?worker.capabilities(),
                "registering worker"
            );
            workers.push(worker);
        }
    }

    /// Remove a worker and run its shutdown hook on a detached task.
    /// Shutdown failures are logged, never propagated.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = {
            let mut workers = self.workers.write().await;
            workers
                .iter()
                .position(|w| w.id() == id)
                .map(|index| workers.remove(index))
        };
        match removed {
            Some(worker) => {
                tracing::info!(worker = %id, "unregistering worker");
                tokio::spawn(async move {
                    if let Err(e) = worker.shutdown().await {
                        tracing::warn!(worker = %worker.id(), error = %e, "shutdown hook failed");
                    }
                });
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.workers
            .read()
            .await
            .iter()
            .find(|w| w.id() == id)
            .cloned()
    }

    pub async fn get_all(&self) -> Vec<Arc<dyn Worker>> {
        self.workers.read().await.clone()
    }

    /// Workers advertising `capability`, in registration order
    pub async fn get_by_capability(&self, capability: &str) -> Vec<Arc<dyn Worker>> {
        self.workers
            .read()
            .await
            .iter()
            .filter(|w| w.has_capability(capability))
            .cloned()
            .collect()
    }

    /// Probe every worker concurrently. Individual probe failures are
    /// recorded in the result set, never thrown.
    pub async fn health_check(&self) -> Vec<WorkerHealth> {
        let workers = self.get_all().await;
        let probes = workers.iter().map(|worker| async move {
            match worker.health_check().await {
                Ok(healthy) => WorkerHealth {
                    worker_id: worker.id().to_string(),
                    healthy,
                    error: None,
                },
                Err(e) => WorkerHealth {
                    worker_id: worker.id().to_string(),
                    healthy: false,
                    error: Some(e.to_string()),
                },
            }
        });
        join_all(probes).await
    }

    /// Resolve a capability to a single worker: an exact
    /// `prefer_version` match first, otherwise the configured
    /// selection policy over the candidates.
    pub async fn find_best(
        &self,
        capability: &str,
        criteria: &SelectionCriteria,
    ) -> Option<Arc<dyn Worker>> {
        let candidates = self.get_by_capability(capability).await;
        if let Some(version) = &criteria.prefer_version {
            if let Some(exact) = candidates.iter().find(|w| w.version() == version) {
                return Some(Arc::clone(exact));
            }
        }
        self.policy.select(&candidates)
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
