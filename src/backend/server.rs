//! Backend server descriptor and its live state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One backend endpoint.
///
/// The address is the identity of a server: two servers with the same
/// address compare equal. Connection and health state live in atomics so
/// a server can be shared behind an `Arc` by every strategy and by the
/// health checker without a pool-wide lock.
#[derive(Debug)]
pub struct Server {
    /// Endpoint identifier, e.g. `http://10.0.0.1:8080`.
    address: String,
    /// Declared capacity hint. Not consulted by any selection algorithm.
    weight: u32,
    /// In-flight requests reserved against this server.
    active_connections: AtomicU32,
    /// Written only by the health checker.
    healthy: AtomicBool,
    /// Unix timestamp (milliseconds) of the last health check, 0 if never.
    last_health_check: AtomicU64,
}

impl Server {
    /// Create a healthy server with no active connections.
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight,
            active_connections: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            last_health_check: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Current number of reserved connections.
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Reserve one connection. Returns the new count.
    pub fn acquire(&self) -> u32 {
        self.active_connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Release one connection. Returns the new count.
    ///
    /// Saturates at zero: a release without a matching reserve is ignored.
    pub fn release(&self) -> u32 {
        match self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::warn!(server = %self.address, "release without matching reservation");
                0
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Record the outcome of a health check.
    ///
    /// This is the write path of the external health checker; strategies
    /// never call it.
    pub fn set_healthy(&self, healthy: bool) {
        self.last_health_check
            .store(current_timestamp_millis(), Ordering::Release);
        let was = self.healthy.swap(healthy, Ordering::AcqRel);
        if was != healthy {
            if healthy {
                tracing::info!(server = %self.address, "server marked healthy");
            } else {
                tracing::warn!(server = %self.address, "server marked unhealthy");
            }
        }
    }

    /// Time of the last health check, if one has been recorded.
    pub fn last_health_check(&self) -> Option<SystemTime> {
        match self.last_health_check.load(Ordering::Acquire) {
            0 => None,
            millis => Some(UNIX_EPOCH + Duration::from_millis(millis)),
        }
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Server {}

impl std::hash::Hash for Server {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Current Unix timestamp in milliseconds.
fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_starts_healthy_and_idle() {
        let server = Server::new("http://localhost:8081", 5);
        assert!(server.is_healthy());
        assert_eq!(server.active_connections(), 0);
        assert_eq!(server.weight(), 5);
        assert!(server.last_health_check().is_none());
    }

    #[test]
    fn test_acquire_release() {
        let server = Server::new("http://localhost:8081", 1);

        assert_eq!(server.acquire(), 1);
        assert_eq!(server.acquire(), 2);
        assert_eq!(server.release(), 1);
        assert_eq!(server.release(), 0);

        // Should not go negative
        assert_eq!(server.release(), 0);
        assert_eq!(server.active_connections(), 0);
    }

    #[test]
    fn test_set_healthy_stamps_check_time() {
        let server = Server::new("http://localhost:8081", 1);

        server.set_healthy(false);
        assert!(!server.is_healthy());
        assert!(server.last_health_check().is_some());

        server.set_healthy(true);
        assert!(server.is_healthy());
    }

    #[test]
    fn test_identity_is_address() {
        let a = Server::new("http://localhost:8081", 1);
        let b = Server::new("http://localhost:8081", 9);
        let c = Server::new("http://localhost:8082", 1);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "http://localhost:8081");
    }
}
