//! Backend pool management and load balancing algorithms.

pub mod algorithms;
mod pool;
mod router;
mod server;

pub use pool::ServerPool;
pub use router::{BackendRouter, Lease, RouteError};
pub use server::Server;
