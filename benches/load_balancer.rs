//! Benchmarks for ringlb components.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ringlb::backend::BackendRouter;
use ringlb::backend::algorithms::{ConsistentHashing, LoadBalancer, hash_key};
use ringlb::backend::Server;
use ringlb::config::{Algorithm, BackendConfig, ServerConfig};
use ringlb::metrics::MetricsCollector;
use std::sync::Arc;

fn create_router(algorithm: Algorithm, num_servers: usize) -> BackendRouter {
    let servers: Vec<ServerConfig> = (0..num_servers)
        .map(|i| ServerConfig {
            address: format!("http://10.0.0.{}:8080", i + 1),
            weight: 1,
        })
        .collect();

    let backends = vec![BackendConfig {
        name: "test".to_string(),
        algorithm,
        virtual_nodes: None,
        servers,
    }];

    BackendRouter::new(&backends)
}

fn benchmark_round_robin(c: &mut Criterion) {
    let router = create_router(Algorithm::RoundRobin, 10);

    c.bench_function("round_robin_select", |b| {
        b.iter(|| {
            black_box(router.select("test", "").ok());
        })
    });
}

fn benchmark_least_connections(c: &mut Criterion) {
    let router = create_router(Algorithm::LeastConnections, 10);

    // Simulate some connections
    let servers = router.servers("test").unwrap();
    for (i, server) in servers.iter().enumerate().take(5) {
        for _ in 0..i {
            server.acquire();
        }
    }

    c.bench_function("least_connections_select", |b| {
        b.iter(|| {
            // Lease is dropped right away, releasing the reservation
            black_box(router.select("test", "").ok());
        })
    });
}

fn benchmark_consistent_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("consistent_hashing_select");

    for num_servers in [3, 10, 50] {
        let router = create_router(Algorithm::ConsistentHashing, num_servers);
        let keys: Vec<String> = (0..1024).map(|i| format!("192.168.{}.{}", i / 256, i % 256)).collect();
        let mut idx = 0;

        group.bench_with_input(BenchmarkId::from_parameter(num_servers), &num_servers, |b, _| {
            b.iter(|| {
                idx = (idx + 1) % keys.len();
                black_box(router.select("test", &keys[idx]).ok());
            })
        });
    }

    group.finish();
}

fn benchmark_consistent_hashing_failover(c: &mut Criterion) {
    let router = create_router(Algorithm::ConsistentHashing, 10);
    let servers = router.servers("test").unwrap();
    for server in servers.iter().take(9) {
        server.set_healthy(false);
    }

    c.bench_function("consistent_hashing_failover", |b| {
        b.iter(|| {
            black_box(router.select("test", "192.168.1.100").ok());
        })
    });
}

fn benchmark_ring_rebuild(c: &mut Criterion) {
    let servers: Vec<Arc<Server>> = (0..10)
        .map(|i| Arc::new(Server::new(format!("http://10.0.0.{}:8080", i + 1), 1)))
        .collect();

    c.bench_function("ring_reconcile_10_servers", |b| {
        b.iter(|| {
            let ch = ConsistentHashing::new();
            ch.reconcile(black_box(&servers));
            black_box(ch.select(&servers, "192.168.1.100").ok());
        })
    });
}

fn benchmark_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hash_key", |b| {
        b.iter(|| {
            black_box(hash_key(black_box("http://10.0.0.1:8080#42")));
        })
    });

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let collector = MetricsCollector::new();

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_selection", |b| {
        b.iter(|| {
            collector.record_selection(
                black_box("test"),
                black_box("round_robin"),
                black_box("http://10.0.0.1:8080"),
            );
        })
    });

    group.bench_function("record_release", |b| {
        b.iter(|| {
            collector.record_release(black_box("test"), black_box("http://10.0.0.1:8080"));
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_round_robin,
    benchmark_least_connections,
    benchmark_consistent_hashing,
    benchmark_consistent_hashing_failover,
    benchmark_ring_rebuild,
    benchmark_hash,
    benchmark_metrics,
);

criterion_main!(benches);
