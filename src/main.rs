//! ringlb - server selection for a reverse-proxy load balancer
//!
//! Usage:
//!     ringlb --config <path> <command>
//!
//! See --help for more options.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use ringlb::backend::BackendRouter;
use ringlb::config::{Config, load_config};
use ringlb::metrics::MetricsCollector;
use ringlb::util::init_logging;

/// Inspect and exercise the server-selection engine of a load balancer.
#[derive(Parser, Debug)]
#[command(name = "ringlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print Prometheus metrics after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and exit
    Validate,

    /// Select a server for each client key
    Route {
        /// Backend pool to route through
        #[arg(short, long)]
        backend: String,

        /// Client keys, typically client addresses
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show how synthetic client keys spread over a consistent-hashing backend
    Analyze {
        /// Backend pool to analyze
        #[arg(short, long)]
        backend: String,

        /// Number of synthetic keys
        #[arg(short, long, default_value_t = 10_000)]
        keys: usize,
    },

    /// Print the hash ring summary of a consistent-hashing backend
    Ring {
        /// Backend pool to inspect
        #[arg(short, long)]
        backend: String,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // Determine log level (CLI overrides config)
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format);

    info!(
        config_path = %cli.config.display(),
        backends = config.backends.len(),
        "ringlb starting"
    );

    let metrics = MetricsCollector::new();
    let router = BackendRouter::new(&config.backends).with_metrics(metrics.clone());

    match &cli.command {
        Command::Validate => print_summary(&config),
        Command::Route { backend, keys } => route(&router, backend, keys)?,
        Command::Analyze { backend, keys } => analyze(&router, backend, *keys)?,
        Command::Ring { backend } => ring(&router, backend)?,
    }

    if cli.metrics {
        let text = metrics.encode().context("failed to encode metrics")?;
        print!("{}", text);
    }

    Ok(())
}

fn print_summary(config: &Config) {
    info!("Configuration is valid");
    println!("Configuration is valid.");
    println!("  Backends: {}", config.backends.len());
    for backend in &config.backends {
        println!(
            "    - {} [{}] {} server(s)",
            backend.name,
            backend.algorithm,
            backend.servers.len()
        );
    }
}

fn route(router: &BackendRouter, backend: &str, keys: &[String]) -> Result<()> {
    for key in keys {
        let lease = router
            .select(backend, key)
            .with_context(|| format!("failed to route key '{}'", key))?;
        println!("{} -> {}", key, lease.address());
    }
    Ok(())
}

fn analyze(router: &BackendRouter, backend: &str, count: usize) -> Result<()> {
    let keys = (0..count).map(|i| format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff));

    let Some(distribution) = router
        .analyze_distribution(backend, keys)
        .with_context(|| format!("failed to analyze backend '{}'", backend))?
    else {
        bail!("backend '{}' does not use consistent_hashing", backend);
    };

    let expected = count as f64 / distribution.len().max(1) as f64;
    println!("{} keys over {} server(s):", count, distribution.len());
    for (server, hits) in &distribution {
        let deviation = if expected > 0.0 {
            (*hits as f64 - expected) / expected * 100.0
        } else {
            0.0
        };
        println!("  {:<40} {:>8} ({:+.1}%)", server, hits, deviation);
    }
    Ok(())
}

fn ring(router: &BackendRouter, backend: &str) -> Result<()> {
    let Some(state) = router.ring_state(backend)? else {
        bail!("backend '{}' does not use consistent_hashing", backend);
    };

    let yaml = serde_yaml::to_string(&state).context("failed to serialize ring state")?;
    print!("{}", yaml);
    Ok(())
}
