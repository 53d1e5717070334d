//! Server pool with copy-on-write membership.

use crate::backend::Server;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A mutable set of backend servers.
///
/// Readers take a lock-free snapshot of the membership; writers build a new
/// member list and swap it in. Writers are serialized among themselves, but
/// never block readers. Per-server counters are not the pool's concern:
/// they live in each [`Server`].
#[derive(Debug)]
pub struct ServerPool {
    servers: ArcSwap<Vec<Arc<Server>>>,
    /// Serializes membership changes.
    write_lock: Mutex<()>,
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::from_servers(Vec::new())
    }

    /// Create a pool holding the given servers, in order.
    pub fn from_servers(servers: Vec<Arc<Server>>) -> Self {
        Self {
            servers: ArcSwap::from_pointee(servers),
            write_lock: Mutex::new(()),
        }
    }

    /// Current membership.
    ///
    /// The order is insertion order, but callers must not rely on it for
    /// anything other than tie-breaking.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Server>>> {
        self.servers.load_full()
    }

    /// Look up a server by address.
    pub fn get(&self, address: &str) -> Option<Arc<Server>> {
        self.servers
            .load()
            .iter()
            .find(|s| s.address() == address)
            .cloned()
    }

    /// Add a server. Returns `false` if a server with the same address is
    /// already a member.
    pub fn add(&self, server: Arc<Server>) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.servers.load();

        if current.iter().any(|s| s.address() == server.address()) {
            return false;
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(server);
        self.servers.store(Arc::new(next));
        true
    }

    /// Remove a server by address, returning it if it was a member.
    pub fn remove(&self, address: &str) -> Option<Arc<Server>> {
        let _guard = self.write_lock.lock();
        let current = self.servers.load();

        let idx = current.iter().position(|s| s.address() == address)?;
        let mut next: Vec<Arc<Server>> = current.iter().cloned().collect();
        let removed = next.remove(idx);
        self.servers.store(Arc::new(next));
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.servers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.load().is_empty()
    }

    /// Number of servers currently flagged healthy.
    pub fn healthy_count(&self) -> usize {
        self.servers.load().iter().filter(|s| s.is_healthy()).count()
    }
}

impl Default for ServerPool {
    fn default() -> Self {
        Self::new()
    }
}
