use certcore::Worker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hints a caller may pass when resolving a capability
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    /// An exact version match wins before the policy is consulted
    pub prefer_version: Option<String>,
}

impl SelectionCriteria {
    pub fn prefer_version(version: impl Into<String>) -> Self {
        Self {
            prefer_version: Some(version.into()),
        }
    }
}

/// Picks one worker among the candidates advertising a capability.
/// Candidates arrive in registration order.
pub trait SelectionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, candidates: &[Arc<dyn Worker>]) -> Option<Arc<dyn Worker>>;
}

/// First registered match. The default, for compatibility with
/// deterministic-by-registration-order behavior.
pub struct RegistrationOrder;

impl SelectionPolicy for RegistrationOrder {
    fn name(&self) -> &'static str {
        "registration-order"
    }

    fn select(&self, candidates: &[Arc<dyn Worker>]) -> Option<Arc<dyn Worker>> {
        candidates.first().cloned()
    }
}

/// Rotates through candidates on successive selections
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, candidates: &[Arc<dyn Worker>]) -> Option<Arc<dyn Worker>> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(index).cloned()
    }
}
