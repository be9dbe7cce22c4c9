// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// Hot paths on every request:
//   1. Pattern lookup — similarity search over the in-memory pattern set
//   2. Scheduling — wave computation over the plan graph
//   3. Request analysis — entity extraction and hashing embeddings

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rusqlite::Connection;

use plancraft::core::graph::waves;
use plancraft::core::types::Step;
use plancraft::memory::embeddings::cosine_similarity;
use plancraft::memory::schema::run_migrations;
use plancraft::memory::store::Store;
use plancraft::memory::{Pattern, PatternMemory};
use plancraft::planner::entities::{EntityExtractor, RuleExtractor};
use plancraft::provider::embedder::HashingEmbedder;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn populate_patterns(memory: &PatternMemory, embedder: &HashingEmbedder, n: usize) {
    for i in 0..n {
        let request = format!(
            "extract field{} and field{} from https://site{}.example.com",
            i % 17,
            i % 23,
            i
        );
        let template = vec![Step::new("fetch", "fetch_page")];
        memory.store(Pattern::new(&request, embedder.embed_sync(&request), template));
    }
}

/// `layers` waves of `width` steps, each depending on every step of the previous layer.
fn layered_plan(layers: usize, width: usize) -> Vec<Step> {
    let mut steps = Vec::with_capacity(layers * width);
    for l in 0..layers {
        for w in 0..width {
            let mut step = Step::new(format!("l{l}w{w}"), "noop");
            if l > 0 {
                for prev in 0..width {
                    step = step.depends_on(format!("l{}w{prev}", l - 1));
                }
            }
            steps.push(step);
        }
    }
    steps
}

// ─── Benchmark: Startup (schema init) ───────────────────────────────────────

fn bench_startup(c: &mut Criterion) {
    c.bench_function("startup_schema_init", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().expect("open in-memory db");
            run_migrations(black_box(&conn)).expect("run migrations");
            Store::new(conn)
        })
    });
}

// ─── Benchmark: Pattern lookup ──────────────────────────────────────────────

fn bench_find_similar(c: &mut Criterion) {
    let embedder = HashingEmbedder::new(256);
    let memory = PatternMemory::default();
    populate_patterns(&memory, &embedder, 1000);
    let query = embedder.embed_sync("extract field3 and field9 from https://new.example.com");

    let mut group = c.benchmark_group("patterns");

    group.bench_function("find_similar_1k_top5", |b| {
        b.iter(|| memory.find_similar(black_box(&query), 5, 0.5))
    });

    group.bench_function("find_similar_1k_no_threshold", |b| {
        b.iter(|| memory.find_similar(black_box(&query), 5, -1.0))
    });

    group.finish();
}

// ─── Benchmark: Scheduling ──────────────────────────────────────────────────

fn bench_waves(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");

    let chain = layered_plan(50, 1);
    group.bench_function("waves_chain_50", |b| b.iter(|| waves(black_box(&chain))));

    let wide = layered_plan(10, 20);
    group.bench_function("waves_10x20_dense", |b| b.iter(|| waves(black_box(&wide))));

    group.finish();
}

// ─── Benchmark: Request analysis ────────────────────────────────────────────

fn bench_request_analysis(c: &mut Criterion) {
    let request = "Scrape the product names, prices and ratings from https://shop.example.com/list \
                   and email the results to \"Ops Team\" at ops@example.com";
    let embedder = HashingEmbedder::new(256);

    let mut group = c.benchmark_group("analysis");

    group.bench_function("extract_entities", |b| {
        b.iter(|| RuleExtractor.extract(black_box(request)))
    });

    group.bench_function("hashing_embed_256d", |b| {
        b.iter(|| embedder.embed_sync(black_box(request)))
    });

    let a = embedder.embed_sync(request);
    let other = embedder.embed_sync("collect titles from https://news.example.org");
    group.bench_function("cosine_similarity_256d", |b| {
        b.iter(|| cosine_similarity(black_box(&a), black_box(&other)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_startup,
    bench_find_similar,
    bench_waves,
    bench_request_analysis
);
criterion_main!(benches);
