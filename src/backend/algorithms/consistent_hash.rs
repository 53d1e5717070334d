//! Consistent hashing with virtual nodes.
//!
//! Each server owns `virtual_nodes` positions on a 64-bit ring, placed at
//! `hash_key("{address}#{i}")`. A client key is hashed onto the same ring and
//! served by the owner of the first position at or after it, wrapping to the
//! lowest position. Adding or removing a server only moves the keys whose
//! ceiling lands on that server's positions, roughly `1/N` of the key space.
//!
//! The ring is an immutable snapshot behind an [`ArcSwap`]. Membership
//! changes clone the current snapshot, apply the diff and publish the result
//! in one store, so a lookup sees either the old ring or the new one and
//! never a server with half its positions removed. Writers are serialized;
//! readers never wait.

use super::{LoadBalancer, SelectionError, hash_key};
use crate::backend::Server;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use tracing::{debug, info};

/// Virtual nodes per server unless configured otherwise.
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Point-in-time summary of the ring, without positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingState {
    /// Positions on the ring across all servers.
    pub total_positions: usize,
    /// Servers tracked by the ring.
    pub servers: usize,
    /// Configured virtual-node density.
    pub virtual_nodes_per_server: usize,
    /// Positions owned by each server, keyed by address.
    pub distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
struct Owner {
    server: Arc<Server>,
    positions: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
struct Ring {
    positions: BTreeMap<u64, Arc<Server>>,
    owners: HashMap<String, Owner>,
}

impl Ring {
    /// Place `server` on the ring. Returns the number of positions it got.
    fn insert(&mut self, server: &Arc<Server>, virtual_nodes: usize) -> usize {
        let mut owned = Vec::with_capacity(virtual_nodes);

        for i in 0..virtual_nodes {
            let position = hash_key(&format!("{}#{}", server.address(), i));
            // A colliding position stays with whoever placed it first.
            if let Entry::Vacant(slot) = self.positions.entry(position) {
                slot.insert(Arc::clone(server));
                owned.push(position);
            }
        }

        let count = owned.len();
        self.owners.insert(
            server.address().to_string(),
            Owner {
                server: Arc::clone(server),
                positions: owned,
            },
        );
        count
    }

    /// Take a server off the ring. Returns the number of positions freed.
    fn remove(&mut self, address: &str) -> Option<usize> {
        let owner = self.owners.remove(address)?;
        for position in &owner.positions {
            self.positions.remove(position);
        }
        Some(owner.positions.len())
    }

    /// Whether the ring tracks exactly these server instances.
    fn tracks(&self, servers: &[Arc<Server>]) -> bool {
        servers.len() == self.owners.len()
            && servers.iter().all(|s| {
                self.owners
                    .get(s.address())
                    .is_some_and(|o| Arc::ptr_eq(&o.server, s))
            })
    }

    /// Ceiling lookup: the first position at or after `hash`, wrapping.
    fn locate(&self, hash: u64) -> Option<(u64, &Arc<Server>)> {
        self.positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(position, server)| (*position, server))
    }

    /// Owners of every position clockwise after `position`, once around.
    fn walk_after(&self, position: u64) -> impl Iterator<Item = &Arc<Server>> {
        self.positions
            .range((Excluded(position), Unbounded))
            .chain(self.positions.range(..=position))
            .map(|(_, server)| server)
    }

    /// Owner of the key, or the first healthy server clockwise from it.
    fn route(&self, key: &str) -> Result<&Arc<Server>, SelectionError> {
        let (position, owner) = self
            .locate(hash_key(key))
            .ok_or(SelectionError::EmptyPool)?;

        if owner.is_healthy() {
            return Ok(owner);
        }

        let live = self.owners.len();
        let mut attempted: HashSet<&str> = HashSet::with_capacity(live);
        attempted.insert(owner.address());

        for server in self.walk_after(position) {
            if attempted.len() >= live {
                break;
            }
            if !attempted.insert(server.address()) {
                continue;
            }
            if server.is_healthy() {
                return Ok(server);
            }
        }

        Err(SelectionError::NoHealthyServersAvailable)
    }
}

/// Consistent-hashing load balancer.
pub struct ConsistentHashing {
    virtual_nodes: usize,
    ring: ArcSwap<Ring>,
    /// Serializes ring mutations.
    write_lock: Mutex<()>,
}

impl ConsistentHashing {
    /// Create a ring with the default virtual-node density.
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    /// Create a ring with `virtual_nodes` positions per server (at least one).
    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: ArcSwap::from_pointee(Ring::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Servers currently on the ring.
    pub fn server_count(&self) -> usize {
        self.ring.load().owners.len()
    }

    /// Bring the ring in line with `servers`.
    ///
    /// Servers no longer listed lose all their positions; new ones get theirs.
    /// Identity is the address, but a different instance under a tracked
    /// address replaces the old one so health reads stay live. Cheap when
    /// nothing changed.
    pub fn reconcile(&self, servers: &[Arc<Server>]) {
        self.ring_for(servers);
    }

    /// A ring snapshot tracking exactly `servers`, reconciling if needed.
    fn ring_for(&self, servers: &[Arc<Server>]) -> Arc<Ring> {
        let current = self.ring.load_full();
        if current.tracks(servers) {
            return current;
        }

        self.update(|ring| {
            let wanted: HashMap<&str, &Arc<Server>> =
                servers.iter().map(|s| (s.address(), s)).collect();

            let stale: Vec<String> = ring
                .owners
                .iter()
                .filter(|(address, owner)| {
                    wanted
                        .get(address.as_str())
                        .is_none_or(|s| !Arc::ptr_eq(*s, &owner.server))
                })
                .map(|(address, _)| address.clone())
                .collect();

            for address in stale {
                if let Some(freed) = ring.remove(&address) {
                    info!(server = %address, virtual_nodes = freed, "removed server from hash ring");
                }
            }

            for server in servers {
                if !ring.owners.contains_key(server.address()) {
                    let placed = ring.insert(server, self.virtual_nodes);
                    info!(server = %server, virtual_nodes = placed, "added server to hash ring");
                }
            }
        })
    }

    /// Place a server on the ring. No-op if its address is already tracked.
    pub fn add_server(&self, server: &Arc<Server>) {
        if self.ring.load().owners.contains_key(server.address()) {
            return;
        }

        self.update(|ring| {
            if !ring.owners.contains_key(server.address()) {
                let placed = ring.insert(server, self.virtual_nodes);
                info!(server = %server, virtual_nodes = placed, "added server to hash ring");
            }
        });
    }

    /// Take a server off the ring. Removing an unknown address is a no-op.
    pub fn remove_server(&self, address: &str) -> bool {
        if !self.ring.load().owners.contains_key(address) {
            return false;
        }

        let mut removed = false;
        self.update(|ring| {
            if let Some(freed) = ring.remove(address) {
                info!(server = %address, virtual_nodes = freed, "removed server from hash ring");
                removed = true;
            }
        });
        removed
    }

    /// Summary of the ring for monitoring.
    pub fn ring_state(&self) -> RingState {
        let ring = self.ring.load();
        RingState {
            total_positions: ring.positions.len(),
            servers: ring.owners.len(),
            virtual_nodes_per_server: self.virtual_nodes,
            distribution: ring
                .owners
                .iter()
                .map(|(address, owner)| (address.clone(), owner.positions.len()))
                .collect(),
        }
    }

    /// Count how many of `keys` route to each server on the current ring.
    ///
    /// For checking uniformity offline; not part of request routing. Health
    /// fallback applies exactly as in [`LoadBalancer::select`].
    pub fn analyze_distribution<I, K>(&self, keys: I) -> Result<BTreeMap<String, usize>, SelectionError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let ring = self.ring.load();
        if ring.owners.is_empty() {
            return Err(SelectionError::EmptyPool);
        }

        let mut distribution: BTreeMap<String, usize> = ring
            .owners
            .keys()
            .map(|address| (address.clone(), 0))
            .collect();

        for key in keys {
            let server = ring.route(key.as_ref())?;
            *distribution.entry(server.address().to_string()).or_default() += 1;
        }

        Ok(distribution)
    }

    /// Copy, mutate and publish the ring under the write lock.
    fn update(&self, apply: impl FnOnce(&mut Ring)) -> Arc<Ring> {
        let _guard = self.write_lock.lock();
        let mut next = Ring::clone(&self.ring.load());
        apply(&mut next);
        let next = Arc::new(next);
        self.ring.store(Arc::clone(&next));
        next
    }
}

impl Default for ConsistentHashing {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for ConsistentHashing {
    fn name(&self) -> &'static str {
        "consistent_hashing"
    }

    fn select(
        &self,
        servers: &[Arc<Server>],
        client_key: &str,
    ) -> Result<Arc<Server>, SelectionError> {
        if servers.is_empty() {
            return Err(SelectionError::EmptyPool);
        }

        // Route on the snapshot that matches `servers`, even if another
        // writer publishes a different membership meanwhile.
        let ring = self.ring_for(servers);
        let selected = ring.route(client_key)?;
        debug!(server = %selected, client = client_key, "consistent hashing selected server");
        Ok(Arc::clone(selected))
    }

    fn on_server_added(&self, server: &Arc<Server>) {
        self.add_server(server);
    }

    fn on_server_removed(&self, server: &Server) {
        self.remove_server(server.address());
    }

    fn as_consistent_hashing(&self) -> Option<&ConsistentHashing> {
        Some(self)
    }
}
