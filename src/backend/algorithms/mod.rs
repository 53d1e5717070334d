//! Load balancing algorithms.

mod consistent_hash;
mod hash;
mod least_conn;
mod round_robin;

pub use consistent_hash::{ConsistentHashing, RingState, DEFAULT_VIRTUAL_NODES};
pub use hash::hash_key;
pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;

use crate::backend::Server;
use crate::config::Algorithm;
use std::sync::Arc;
use thiserror::Error;

/// Why a selection could not produce a server.
///
/// Both conditions are terminal for the current request. Retrying is up to
/// the caller.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("server pool is empty")]
    EmptyPool,

    #[error("no healthy servers available")]
    NoHealthyServersAvailable,
}

impl SelectionError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            SelectionError::EmptyPool => "empty_pool",
            SelectionError::NoHealthyServersAvailable => "no_healthy_servers",
        }
    }
}

/// Trait for load balancing algorithms.
pub trait LoadBalancer: Send + Sync {
    /// Name the algorithm is configured by.
    fn name(&self) -> &'static str;

    /// Select a backend server for one request.
    ///
    /// # Arguments
    ///
    /// * `servers` - Current pool membership, healthy or not
    /// * `client_key` - Routing key, typically the client address
    ///
    /// # Returns
    ///
    /// A member of `servers`, healthy whenever any member is healthy.
    fn select(
        &self,
        servers: &[Arc<Server>],
        client_key: &str,
    ) -> Result<Arc<Server>, SelectionError>;

    /// Release whatever `select` reserved on `server`.
    ///
    /// Called exactly once per successful selection, when the forwarded call
    /// completes.
    fn release(&self, _server: &Server) {}

    /// Notify that a server joined the pool.
    fn on_server_added(&self, _server: &Arc<Server>) {}

    /// Notify that a server left the pool.
    fn on_server_removed(&self, _server: &Server) {}

    /// Administrative access to the hash ring, for algorithms that keep one.
    fn as_consistent_hashing(&self) -> Option<&ConsistentHashing> {
        None
    }
}

/// Build the algorithm configured by `algorithm`.
///
/// `virtual_nodes` only applies to consistent hashing.
pub fn from_algorithm(algorithm: Algorithm, virtual_nodes: Option<usize>) -> Arc<dyn LoadBalancer> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobin::new()),
        Algorithm::LeastConnections => Arc::new(LeastConnections::new()),
        Algorithm::ConsistentHashing => Arc::new(ConsistentHashing::with_virtual_nodes(
            virtual_nodes.unwrap_or(DEFAULT_VIRTUAL_NODES),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn servers(addresses: &[&str]) -> Vec<Arc<Server>> {
        addresses
            .iter()
            .map(|a| Arc::new(Server::new(*a, 1)))
            .collect()
    }
}
