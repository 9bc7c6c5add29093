//! Benchmarks for the deterministic bucketing hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use uuid::Uuid;

use signalpath_core::experiments::assignment::{bucket, select_variant};
use signalpath_core::experiments::{Experiment, ExperimentStatus, Variant};

fn experiment_with_variants(count: usize) -> Experiment {
    let allocation = 1.0 / count as f64;
    let mut variants = BTreeMap::new();
    variants.insert(
        "control".to_string(),
        Variant {
            name: "Control".to_string(),
            allocation,
            payload: serde_json::Value::Null,
        },
    );
    for i in 1..count {
        variants.insert(
            format!("variant_{}", i),
            Variant {
                name: format!("Variant {}", i),
                allocation,
                payload: serde_json::Value::Null,
            },
        );
    }
    Experiment {
        id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        name: "bench".to_string(),
        primary_metric: "conversion".to_string(),
        confidence_level: 0.95,
        required_sample_size: None,
        auto_winner_enabled: false,
        status: ExperimentStatus::Running,
        variants,
        winner_variant_id: None,
        started_at: None,
        ended_at: None,
        created_at: chrono::Utc::now(),
    }
}

fn bench_bucket(c: &mut Criterion) {
    let experiment_id = Uuid::new_v4();
    c.bench_function("bucket_sha256", |b| {
        b.iter(|| bucket(black_box(experiment_id), black_box("actor-123456")))
    });
}

fn bench_select_variant(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_variant");
    for count in [2, 5, 10] {
        let experiment = experiment_with_variants(count);
        group.bench_function(format!("{}_variants", count), |b| {
            b.iter(|| select_variant(black_box(&experiment), black_box(0.73)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bucket, bench_select_variant);
criterion_main!(benches);
