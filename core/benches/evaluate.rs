//! Evaluate benchmarks — the hot path.
//!
//! Measures: single-dimension hit/miss, rule-count scaling, fall-through
//! nesting, normalization, and trace overhead.

use futures::executor::block_on;
use serde_json::json;
use tailor::prelude::*;

fn main() {
    divan::main();
}

// ═══════════════════════════════════════════════════════════════════════════════
// Test fixtures
// ═══════════════════════════════════════════════════════════════════════════════

fn builder() -> tailor::StoreBuilder {
    Store::builder()
        .payload("flag", validator::any())
        .targeting(
            "bucket",
            TargetingDescriptor::new(targeting::one_of()).query(validator::number()),
        )
        .targeting(
            "region",
            TargetingDescriptor::new(targeting::equals()).query(validator::string()),
        )
        .fall_through(
            "browser",
            TargetingDescriptor::new(targeting::string_match())
                .targeting(targeting::string_match_validator())
                .query(validator::string()),
        )
}

/// `n` rules, rule `i` targets bucket `i`, then an unconditional default.
fn bucket_rules(n: usize) -> Vec<PayloadRule> {
    (0..n)
        .map(|i| PayloadRule::new(i).when("bucket", json!([i])))
        .chain(std::iter::once(PayloadRule::new("default")))
        .collect()
}

fn store_with(rules: Vec<PayloadRule>) -> Store {
    block_on(async {
        builder()
            .build()
            .expect("store builds")
            .add_rules("flag", rules)
            .await
            .expect("rules are valid")
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Core scenario: one dimension (baseline)
// ═══════════════════════════════════════════════════════════════════════════════

#[divan::bench]
fn single_rule_hit(bencher: divan::Bencher) {
    let store = store_with(bucket_rules(1));
    let query = Query::new().with("bucket", 0);

    bencher.bench_local(|| block_on(store.get_payload("flag", &query)));
}

#[divan::bench]
fn single_rule_miss(bencher: divan::Bencher) {
    let store = store_with(bucket_rules(1));
    let query = Query::new().with("bucket", 7);

    bencher.bench_local(|| block_on(store.get_payload("flag", &query)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scaling: rule count
// ═══════════════════════════════════════════════════════════════════════════════

#[divan::bench(args = [1, 10, 50, 100, 200])]
fn rule_count_last_match(bencher: divan::Bencher, n: usize) {
    let store = store_with(bucket_rules(n));
    let query = Query::new().with("bucket", n - 1);

    bencher.bench_local(|| block_on(store.get_payload("flag", &query)));
}

#[divan::bench(args = [1, 10, 50, 100, 200])]
fn rule_count_fallback(bencher: divan::Bencher, n: usize) {
    let store = store_with(bucket_rules(n));
    let query = Query::new().with("bucket", n + 1);

    bencher.bench_local(|| block_on(store.get_payload("flag", &query)));
}

#[divan::bench(args = [1, 10, 50, 100, 200])]
fn get_payloads_all(bencher: divan::Bencher, n: usize) {
    let store = store_with(bucket_rules(n));
    let query = Query::new().with("bucket", 0);

    bencher.bench_local(|| block_on(store.get_payloads("flag", &query)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fall-through nesting
// ═══════════════════════════════════════════════════════════════════════════════

#[divan::bench(args = [1, 5, 10, 20])]
fn fall_through_width(bencher: divan::Bencher, width: usize) {
    let rules = (0..width)
        .map(|i| {
            PayloadRule::new(i)
                .when("region", "eu")
                .when("browser", json!({"contains": format!("Engine/{i}")}))
        })
        .collect();
    let store = store_with(rules);
    let query = Query::new()
        .with("region", "eu")
        .with("browser", format!("Mozilla/5.0 Engine/{}", width - 1));

    bencher.bench_local(|| block_on(store.get_payload("flag", &query)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Normalization
// ═══════════════════════════════════════════════════════════════════════════════

#[divan::bench(args = [10, 100, 1000])]
fn normalize_rules(bencher: divan::Bencher, n: usize) {
    let store = builder().build().expect("store builds");

    bencher
        .with_inputs(|| bucket_rules(n))
        .bench_local_values(|rules| block_on(store.add_rules("flag", rules)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Trace overhead
// ═══════════════════════════════════════════════════════════════════════════════

#[divan::bench]
fn trace_overhead_get_payload(bencher: divan::Bencher) {
    let store = store_with(bucket_rules(10));
    let query = Query::new().with("bucket", 9);

    bencher.bench_local(|| block_on(store.get_payload("flag", &query)));
}

#[divan::bench]
fn trace_overhead_explain(bencher: divan::Bencher) {
    let store = store_with(bucket_rules(10));
    let query = Query::new().with("bucket", 9);

    bencher.bench_local(|| block_on(store.explain("flag", &query)));
}
