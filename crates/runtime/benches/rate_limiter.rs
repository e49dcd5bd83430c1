use std::collections::BTreeMap;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use pipeline_config::RateLimit;
use pipeline_runtime::RateLimiter;

/// Cost of the lock + refill path when the bucket never runs dry.
fn bench_uncontended_acquire(c: &mut Criterion) {
    let mut plan = BTreeMap::new();
    plan.insert("llm".to_string(), RateLimit::new(u32::MAX, u32::MAX));
    let limiter = RateLimiter::new(&plan);

    c.bench_function("acquire/limited", |b| {
        b.iter(|| limiter.acquire(black_box("llm")))
    });
    c.bench_function("acquire/unknown_resource", |b| {
        b.iter(|| limiter.acquire(black_box("s3")))
    });
}

criterion_group!(benches, bench_uncontended_acquire);
criterion_main!(benches);
