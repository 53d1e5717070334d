//! Configuration validation.

use crate::config::{Algorithm, Config};
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - Unique, non-empty backend names
/// - At least one server per backend, with unique non-empty addresses
/// - Server weights of at least 1
/// - A positive virtual-node count where one is given
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problem.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    // Check for at least one backend
    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut backend_names = HashSet::new();

    for backend in &config.backends {
        // Check for empty name
        if backend.name.is_empty() {
            errors.push("backend name cannot be empty".to_string());
        }

        // Check for duplicate backend names
        if !backend_names.insert(backend.name.as_str()) {
            errors.push(format!("duplicate backend name: {}", backend.name));
        }

        // Check for at least one server
        if backend.servers.is_empty() {
            errors.push(format!(
                "backend '{}' must have at least one server",
                backend.name
            ));
        }

        let mut addresses = HashSet::new();
        for server in &backend.servers {
            if server.address.trim().is_empty() {
                errors.push(format!(
                    "backend '{}' has a server with an empty address",
                    backend.name
                ));
            } else if !addresses.insert(server.address.as_str()) {
                errors.push(format!(
                    "duplicate server address {} in backend '{}'",
                    server.address, backend.name
                ));
            }

            if server.weight == 0 {
                errors.push(format!(
                    "server {} in backend '{}' has weight 0 (must be >= 1)",
                    server.address, backend.name
                ));
            }
        }

        match (backend.algorithm, backend.virtual_nodes) {
            (_, Some(0)) => errors.push(format!(
                "backend '{}' has virtual_nodes 0 (must be >= 1)",
                backend.name
            )),
            (Algorithm::ConsistentHashing, _) | (_, None) => {}
            (algorithm, Some(_)) => {
                tracing::warn!(
                    backend = %backend.name,
                    algorithm = %algorithm,
                    "virtual_nodes is only used by consistent_hashing"
                );
            }
        }
    }

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
