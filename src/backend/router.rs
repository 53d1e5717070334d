//! Backend router for selecting upstream servers.

use crate::backend::algorithms::{self, LoadBalancer, RingState, SelectionError};
use crate::backend::{Server, ServerPool};
use crate::config::BackendConfig;
use crate::metrics::MetricsCollector;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by [`BackendRouter`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Routes requests to backend servers based on configured algorithm.
pub struct BackendRouter {
    /// Map of backend name to backend info.
    backends: HashMap<String, BackendInfo>,
    /// Optional metrics sink.
    metrics: Option<MetricsCollector>,
}

/// Information about a backend pool.
struct BackendInfo {
    name: Arc<str>,
    /// Current pool membership.
    pool: ServerPool,
    /// The load balancer algorithm.
    algorithm: Arc<dyn LoadBalancer>,
}

/// A selected server, held for the duration of one forwarded request.
///
/// Dropping the lease is the completion signal: it releases whatever the
/// algorithm reserved on the server, exactly once, whether the request
/// succeeded, failed or was cancelled.
pub struct Lease {
    server: Arc<Server>,
    algorithm: Arc<dyn LoadBalancer>,
    backend: Arc<str>,
    metrics: Option<MetricsCollector>,
}

impl Lease {
    /// The selected server.
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Name of the backend pool the server was chosen from.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Mark the forwarded request complete.
    pub fn complete(self) {}
}

impl Deref for Lease {
    type Target = Server;

    fn deref(&self) -> &Server {
        &self.server
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("backend", &self.backend)
            .field("server", &self.server.address())
            .field("algorithm", &self.algorithm.name())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.algorithm.release(&self.server);
        if let Some(metrics) = &self.metrics {
            metrics.record_release(&self.backend, self.server.address());
        }
        debug!(backend = %self.backend, server = %self.server, "released server");
    }
}

impl BackendRouter {
    /// Create a new backend router from configuration.
    pub fn new(backends: &[BackendConfig]) -> Self {
        let backend_map = backends
            .iter()
            .map(|backend| {
                let servers: Vec<Arc<Server>> = backend
                    .servers
                    .iter()
                    .map(|s| Arc::new(Server::new(s.address.clone(), s.weight)))
                    .collect();

                let algorithm = algorithms::from_algorithm(backend.algorithm, backend.virtual_nodes);
                for server in &servers {
                    algorithm.on_server_added(server);
                }

                let info = BackendInfo {
                    name: Arc::from(backend.name.as_str()),
                    pool: ServerPool::from_servers(servers),
                    algorithm,
                };
                (backend.name.clone(), info)
            })
            .collect();

        Self {
            backends: backend_map,
            metrics: None,
        }
    }

    /// Record selections, releases and health into `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        for backend in self.backends.values() {
            for server in backend.pool.snapshot().iter() {
                metrics.set_backend_health(&backend.name, server.address(), server.is_healthy());
            }
            if let Some(ch) = backend.algorithm.as_consistent_hashing() {
                metrics.set_ring_positions(&backend.name, ch.ring_state().total_positions);
            }
        }
        self.metrics = Some(metrics);
        self
    }

    /// Select a backend server for the given backend name.
    ///
    /// # Arguments
    ///
    /// * `backend_name` - Name of the backend pool
    /// * `client_key` - Routing key, typically the client address
    ///
    /// # Returns
    ///
    /// A lease on the selected server. Drop it when the forwarded request
    /// completes.
    pub fn select(&self, backend_name: &str, client_key: &str) -> Result<Lease, RouteError> {
        let backend = self.backend(backend_name)?;
        let servers = backend.pool.snapshot();

        match backend.algorithm.select(&servers, client_key) {
            Ok(server) => {
                debug!(
                    backend = backend_name,
                    server = %server,
                    algorithm = backend.algorithm.name(),
                    "selected backend server"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_selection(backend_name, backend.algorithm.name(), server.address());
                }
                Ok(Lease {
                    server,
                    algorithm: Arc::clone(&backend.algorithm),
                    backend: Arc::clone(&backend.name),
                    metrics: self.metrics.clone(),
                })
            }
            Err(e) => {
                warn!(
                    backend = backend_name,
                    algorithm = backend.algorithm.name(),
                    error = %e,
                    "server selection failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(backend_name, backend.algorithm.name(), e.reason());
                }
                Err(e.into())
            }
        }
    }

    /// Names of all configured backends.
    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get all servers for a backend.
    pub fn servers(&self, backend_name: &str) -> Option<Arc<Vec<Arc<Server>>>> {
        self.backends.get(backend_name).map(|b| b.pool.snapshot())
    }

    /// Name of the algorithm a backend uses.
    pub fn algorithm(&self, backend_name: &str) -> Option<&'static str> {
        self.backends.get(backend_name).map(|b| b.algorithm.name())
    }

    /// Add a server to a backend. Returns `false` if the address is taken.
    pub fn add_server(&self, backend_name: &str, server: Arc<Server>) -> Result<bool, RouteError> {
        let backend = self.backend(backend_name)?;

        if !backend.pool.add(Arc::clone(&server)) {
            return Ok(false);
        }
        backend.algorithm.on_server_added(&server);

        if let Some(metrics) = &self.metrics {
            metrics.set_backend_health(backend_name, server.address(), server.is_healthy());
        }
        self.refresh_ring_metric(backend);
        debug!(backend = backend_name, server = %server, "server added");
        Ok(true)
    }

    /// Remove a server from a backend.
    ///
    /// The algorithm forgets the server before this returns. Outstanding
    /// leases on it stay valid and release normally.
    pub fn remove_server(
        &self,
        backend_name: &str,
        address: &str,
    ) -> Result<Option<Arc<Server>>, RouteError> {
        let backend = self.backend(backend_name)?;

        let removed = backend.pool.remove(address);
        if let Some(server) = &removed {
            backend.algorithm.on_server_removed(server);
            self.refresh_ring_metric(backend);
            debug!(backend = backend_name, server = %server, "server removed");
        }
        Ok(removed)
    }

    /// Record a health check result for a server.
    ///
    /// Returns `false` if the backend has no server with that address.
    pub fn set_health(
        &self,
        backend_name: &str,
        address: &str,
        healthy: bool,
    ) -> Result<bool, RouteError> {
        let backend = self.backend(backend_name)?;

        let Some(server) = backend.pool.get(address) else {
            return Ok(false);
        };
        server.set_healthy(healthy);

        if let Some(metrics) = &self.metrics {
            metrics.set_backend_health(backend_name, address, healthy);
        }
        Ok(true)
    }

    /// Ring summary for a consistent-hashing backend, `None` otherwise.
    pub fn ring_state(&self, backend_name: &str) -> Result<Option<RingState>, RouteError> {
        let backend = self.backend(backend_name)?;
        Ok(backend.algorithm.as_consistent_hashing().map(|ch| ch.ring_state()))
    }

    /// Key distribution for a consistent-hashing backend, `None` otherwise.
    pub fn analyze_distribution<I, K>(
        &self,
        backend_name: &str,
        keys: I,
    ) -> Result<Option<BTreeMap<String, usize>>, RouteError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let backend = self.backend(backend_name)?;
        match backend.algorithm.as_consistent_hashing() {
            Some(ch) => Ok(Some(ch.analyze_distribution(keys)?)),
            None => Ok(None),
        }
    }

    fn backend(&self, backend_name: &str) -> Result<&BackendInfo, RouteError> {
        self.backends
            .get(backend_name)
            .ok_or_else(|| RouteError::UnknownBackend(backend_name.to_string()))
    }

    fn refresh_ring_metric(&self, backend: &BackendInfo) {
        if let (Some(metrics), Some(ch)) = (&self.metrics, backend.algorithm.as_consistent_hashing()) {
            metrics.set_ring_positions(&backend.name, ch.ring_state().total_positions);
        }
    }
}
