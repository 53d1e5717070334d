//! Least-connections load balancing algorithm.

use super::{LoadBalancer, SelectionError};
use crate::backend::Server;
use std::sync::Arc;

/// Least-connections load balancer.
///
/// Sends requests to the healthy server with the fewest active connections.
/// Ties go to the earliest server in pool order. Selecting a server reserves
/// one connection on it; [`LoadBalancer::release`] gives it back.
pub struct LeastConnections;

impl LeastConnections {
    /// Create a new least-connections load balancer.
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for LeastConnections {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    fn select(
        &self,
        servers: &[Arc<Server>],
        _client_key: &str,
    ) -> Result<Arc<Server>, SelectionError> {
        if servers.is_empty() {
            return Err(SelectionError::EmptyPool);
        }

        // Counts may be stale by the time we reserve; only the counter
        // itself has to stay exact.
        let mut selected: Option<(&Arc<Server>, u32)> = None;
        for server in servers.iter().filter(|s| s.is_healthy()) {
            let conns = server.active_connections();
            match selected {
                Some((_, min)) if conns >= min => {}
                _ => selected = Some((server, conns)),
            }
        }

        let (server, _) = selected.ok_or(SelectionError::NoHealthyServersAvailable)?;
        let reserved = server.acquire();
        tracing::debug!(server = %server, active = reserved, "least connections selected server");
        Ok(Arc::clone(server))
    }

    fn release(&self, server: &Server) {
        server.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::algorithms::test_support::servers;

    #[test]
    fn test_least_conn_selects_lowest() {
        let lc = LeastConnections::new();
        let servers = servers(&["s1", "s2", "s3"]);

        for _ in 0..2 {
            servers[0].acquire();
        }
        servers[1].acquire();
        for _ in 0..3 {
            servers[2].acquire();
        }

        let selected = lc.select(&servers, "").unwrap();
        assert_eq!(selected.address(), "s2");
        assert_eq!(servers[1].active_connections(), 2);
    }

    #[test]
    fn test_least_conn_equal_connections() {
        let lc = LeastConnections::new();
        let servers = servers(&["s1", "s2", "s3"]);

        // All servers have 0 connections, should pick first
        let selected = lc.select(&servers, "").unwrap();
        assert_eq!(selected.address(), "s1");
    }

    #[test]
    fn test_least_conn_tie_goes_to_pool_order() {
        let lc = LeastConnections::new();
        let servers = servers(&["s1", "s2", "s3"]);
        servers[0].acquire();

        // s2 and s3 tie at zero
        assert_eq!(lc.select(&servers, "").unwrap().address(), "s2");
        // now s1, s2 tie at one, s3 at zero
        assert_eq!(lc.select(&servers, "").unwrap().address(), "s3");
        // all at one
        assert_eq!(lc.select(&servers, "").unwrap().address(), "s1");
    }

    #[test]
    fn test_least_conn_reservations_accumulate() {
        let lc = LeastConnections::new();
        let servers = servers(&["s1", "s2"]);

        let mut chosen = [0u32; 2];
        for _ in 0..9 {
            let s = lc.select(&servers, "").unwrap();
            let idx = if s.address() == "s1" { 0 } else { 1 };
            chosen[idx] += 1;
        }

        assert_eq!(servers[0].active_connections(), chosen[0]);
        assert_eq!(servers[1].active_connections(), chosen[1]);
        assert_eq!(chosen[0] + chosen[1], 9);
    }

    #[test]
    fn test_least_conn_release() {
        let lc = LeastConnections::new();
        let servers = servers(&["s1"]);

        let s = lc.select(&servers, "").unwrap();
        assert_eq!(s.active_connections(), 1);

        lc.release(&s);
        assert_eq!(s.active_connections(), 0);
    }

    #[test]
    fn test_least_conn_skips_unhealthy() {
        let lc = LeastConnections::new();
        let servers = servers(&["s1", "s2"]);
        servers[0].set_healthy(false);
        servers[1].acquire();
        servers[1].acquire();

        let selected = lc.select(&servers, "").unwrap();
        assert_eq!(selected.address(), "s2");
        assert_eq!(servers[0].active_connections(), 0);
    }

    #[test]
    fn test_least_conn_empty() {
        let lc = LeastConnections::new();
        assert_eq!(lc.select(&[], "").unwrap_err(), SelectionError::EmptyPool);
    }

    #[test]
    fn test_least_conn_all_unhealthy() {
        let lc = LeastConnections::new();
        let servers = servers(&["s1"]);
        servers[0].set_healthy(false);

        assert_eq!(
            lc.select(&servers, "").unwrap_err(),
            SelectionError::NoHealthyServersAvailable
        );
        assert_eq!(servers[0].active_connections(), 0);
    }

    #[test]
    fn test_least_conn_concurrent_reservations() {
        let lc = Arc::new(LeastConnections::new());
        let servers = Arc::new(servers(&["s1", "s2", "s3", "s4"]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lc = Arc::clone(&lc);
                let servers = Arc::clone(&servers);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        lc.select(&servers, "").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let total: u32 = servers.iter().map(|s| s.active_connections()).sum();
        assert_eq!(total, 8000);
    }
}
