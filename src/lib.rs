//! ringlb - server selection for a reverse-proxy load balancer
//!
//! This crate provides the part of a load balancer that picks a backend:
//! - A concurrent server pool with per-server connection and health state
//! - Round robin, least connections and consistent hashing algorithms
//! - A router that hands out leases and releases them on completion
//! - YAML configuration and Prometheus metrics

pub mod backend;
pub mod config;
pub mod metrics;
pub mod util;

pub use config::Config;
