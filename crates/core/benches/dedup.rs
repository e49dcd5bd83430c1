use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use pipeline_core::{Job, Payload, deduplicate, make_job};
use serde_json::json;

/// Jobs over `distinct` keys, each key repeated `repeats` times (the shape a
/// step produces when it enumerates overlapping combinations).
fn overlapping_jobs(distinct: usize, repeats: usize) -> Vec<Job> {
    (0..repeats)
        .flat_map(|round| {
            (0..distinct).map(move |i| {
                let mut payload = Payload::new();
                payload.insert("category_id".into(), json!(i));
                payload.insert("language".into(), json!("de"));
                payload.insert("round".into(), json!(round));
                make_job("bench", payload, &["category_id", "language"])
            })
        })
        .collect()
}

fn bench_deduplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicate");

    for &(distinct, repeats) in &[(100, 1), (100, 10), (1_000, 4)] {
        let jobs = overlapping_jobs(distinct, repeats);
        group.throughput(Throughput::Elements(jobs.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{distinct}x{repeats}")),
            &jobs,
            |b, jobs| b.iter(|| deduplicate(black_box(jobs.clone()))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_deduplicate);
criterion_main!(benches);
