//! Benchmarks for `MemorySubstrate`: write throughput, hydrate latency, and
//! semantic search scaling across small/medium/large library sizes.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use uuid::Uuid;

use noetic_core::graph_store::SqliteGraphStore;
use noetic_core::kv_store::SqliteKVStore;
use noetic_core::vector_store::SqliteVectorStore;
use noetic_core::{EmbeddingPipeline, GraphNode, IdentityMint, MemorySubstrate, PhaseEmbeddings};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn build_substrate() -> MemorySubstrate {
    MemorySubstrate::new(
        Arc::new(SqliteGraphStore::new_in_memory().unwrap()),
        Arc::new(SqliteVectorStore::new_in_memory().unwrap()),
        Arc::new(SqliteKVStore::new_in_memory().unwrap()),
        IdentityMint::deterministic(),
        None,
    )
}

fn embedding_for(i: usize) -> PhaseEmbeddings {
    let base = (i % 97) as f32 / 97.0;
    PhaseEmbeddings {
        summary: Some(vec![base; 384]),
        key_points: Some(vec![base * 0.5; 384]),
        context: None,
        holistic: None,
    }
}

async fn seed(substrate: &MemorySubstrate, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = Uuid::new_v4();
        let node = GraphNode::new(id, "concept", json!({"seq": i}), false);
        substrate.put(node, Some(embedding_for(i))).await.unwrap();
        ids.push(id);
    }
    ids
}

/// Write throughput: each iteration puts a fresh node + embeddings into an
/// empty substrate.
fn bench_put(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("put_node_with_embeddings", |b| {
        b.iter_batched(
            build_substrate,
            |substrate| {
                rt.block_on(async {
                    let id = Uuid::new_v4();
                    let node = GraphNode::new(id, "concept", json!({"seq": 0}), false);
                    substrate.put(node, Some(embedding_for(0))).await.unwrap();
                });
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Hydrate latency for small/medium/large libraries: the substrate already
/// holds `size` records, and each iteration hydrates one of them by id.
fn bench_hydrate(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("hydrate_by_size");

    for size in [100usize, 1_000, 10_000].iter() {
        let substrate = build_substrate();
        let ids = rt.block_on(seed(&substrate, *size));
        let target = ids[ids.len() / 2];

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async { substrate.hydrate(target).await.unwrap() });
            });
        });
    }

    group.finish();
}

/// Semantic search scaling across small/medium/large library sizes.
fn bench_semantic_search(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("semantic_search_by_size");

    for size in [100usize, 1_000, 10_000].iter() {
        let substrate = build_substrate();
        rt.block_on(seed(&substrate, *size));
        let query = vec![0.42f32; 384];

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    substrate.semantic_search(&query, 5, None).await.unwrap()
                });
            });
        });
    }

    group.finish();
}

/// Reconciliation sweep cost over a medium-sized, fully-consistent substrate.
fn bench_reconcile_tick(c: &mut Criterion) {
    let rt = runtime();
    let substrate = build_substrate();
    rt.block_on(seed(&substrate, 1_000));

    c.bench_function("reconcile_tick_1000_records", |b| {
        b.iter(|| {
            rt.block_on(async { substrate.reconcile_tick().await.unwrap() });
        });
    });
}

/// Embedding pipeline cost feeding into a `put`, using the deterministic test
/// embedder since no production embedder ships with this crate.
fn bench_embedding_then_put(c: &mut Criterion) {
    let rt = runtime();
    let pipeline = EmbeddingPipeline::new(Box::new(
        noetic_core::DeterministicTestEmbedder::default(),
    ));

    c.bench_function("embed_and_put_single_node", |b| {
        b.iter_batched(
            build_substrate,
            |substrate| {
                rt.block_on(async {
                    let embeddings = pipeline
                        .embed_phase(
                            "the quick brown fox jumps over the lazy dog",
                            "fox, dog, jump",
                            "idle sentence used as benchmark input",
                        )
                        .await
                        .unwrap();
                    let id = Uuid::new_v4();
                    let node = GraphNode::new(id, "perception", json!({}), false);
                    substrate.put(node, Some(embeddings)).await.unwrap();
                });
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_hydrate,
    bench_semantic_search,
    bench_reconcile_tick,
    bench_embedding_then_put,
);

criterion_main!(benches);
