//! Metrics collector using prometheus-client.
//!
//! Provides metrics for server selections, selection failures, in-flight
//! leases, backend health and ring size.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Labels for selection metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SelectionLabels {
    pub backend: String,
    pub strategy: String,
    pub server: String,
}

/// Labels for selection failure metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailureLabels {
    pub backend: String,
    pub strategy: String,
    pub reason: String,
}

/// Labels for per-server metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServerLabels {
    pub backend: String,
    pub server: String,
}

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Successful selections.
    selections_total: Family<SelectionLabels, Counter>,
    /// Failed selections by reason.
    selection_failures_total: Family<FailureLabels, Counter>,
    /// Leases not yet released.
    active_connections: Family<ServerLabels, Gauge>,
    /// Backend health gauge (1 = healthy, 0 = unhealthy).
    backend_health: Family<ServerLabels, Gauge>,
    /// Hash ring size per backend.
    ring_positions: Family<BackendLabels, Gauge>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let selections_total = Family::<SelectionLabels, Counter>::default();
        let selection_failures_total = Family::<FailureLabels, Counter>::default();
        let active_connections = Family::<ServerLabels, Gauge>::default();
        let backend_health = Family::<ServerLabels, Gauge>::default();
        let ring_positions = Family::<BackendLabels, Gauge>::default();

        registry.register(
            "ringlb_selections",
            "Total number of successful server selections",
            selections_total.clone(),
        );
        registry.register(
            "ringlb_selection_failures",
            "Total number of failed server selections",
            selection_failures_total.clone(),
        );
        registry.register(
            "ringlb_active_connections",
            "Number of selected servers not yet released",
            active_connections.clone(),
        );
        registry.register(
            "ringlb_backend_health",
            "Backend server health status (1=healthy, 0=unhealthy)",
            backend_health.clone(),
        );
        registry.register(
            "ringlb_ring_positions",
            "Number of positions on the consistent hash ring",
            ring_positions.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                selections_total,
                selection_failures_total,
                active_connections,
                backend_health,
                ring_positions,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Encode all metrics in the prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.inner.registry)?;
        Ok(buffer)
    }

    /// Record a successful selection; the server now holds one more lease.
    pub fn record_selection(&self, backend: &str, strategy: &str, server: &str) {
        let labels = SelectionLabels {
            backend: backend.to_string(),
            strategy: strategy.to_string(),
            server: server.to_string(),
        };
        self.inner.selections_total.get_or_create(&labels).inc();
        self.inner
            .active_connections
            .get_or_create(&server_labels(backend, server))
            .inc();
    }

    /// Record that a lease was released.
    pub fn record_release(&self, backend: &str, server: &str) {
        self.inner
            .active_connections
            .get_or_create(&server_labels(backend, server))
            .dec();
    }

    /// Record a failed selection.
    pub fn record_failure(&self, backend: &str, strategy: &str, reason: &str) {
        let labels = FailureLabels {
            backend: backend.to_string(),
            strategy: strategy.to_string(),
            reason: reason.to_string(),
        };
        self.inner.selection_failures_total.get_or_create(&labels).inc();
    }

    /// Update backend health status.
    pub fn set_backend_health(&self, backend: &str, server: &str, healthy: bool) {
        self.inner
            .backend_health
            .get_or_create(&server_labels(backend, server))
            .set(if healthy { 1 } else { 0 });
    }

    /// Update the ring size for a backend.
    pub fn set_ring_positions(&self, backend: &str, positions: usize) {
        let labels = BackendLabels {
            backend: backend.to_string(),
        };
        self.inner
            .ring_positions
            .get_or_create(&labels)
            .set(positions as i64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn server_labels(backend: &str, server: &str) -> ServerLabels {
    ServerLabels {
        backend: backend.to_string(),
        server: server.to_string(),
    }
}
