//! Round-robin load balancing algorithm.

use super::{LoadBalancer, SelectionError};
use crate::backend::Server;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin load balancer.
///
/// Cycles through the healthy servers in pool order. The cursor is shared by
/// all callers and indexes into whatever the healthy subset is at call time,
/// so when that subset changes the next pick may skip or repeat a server.
/// Fairness holds only while the healthy set is stable.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Create a new round-robin load balancer.
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(
        &self,
        servers: &[Arc<Server>],
        _client_key: &str,
    ) -> Result<Arc<Server>, SelectionError> {
        if servers.is_empty() {
            return Err(SelectionError::EmptyPool);
        }

        let healthy: Vec<&Arc<Server>> = servers.iter().filter(|s| s.is_healthy()).collect();
        if healthy.is_empty() {
            return Err(SelectionError::NoHealthyServersAvailable);
        }

        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        let selected = healthy[idx];
        tracing::debug!(server = %selected, "round robin selected server");
        Ok(Arc::clone(selected))
    }
}
