//! Benchmarks for the pure scoring functions that run once per probe per
//! analysis cycle — with thousands of probes per workspace these add up,
//! so their cost per call is worth tracking across changes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use netwatcher_controller::analysis::scoring::{compute_mos, health_vector, score_latency, score_packet_loss};
use netwatcher_controller::domain::ProbeMetrics;

fn bench_score_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("score_latency");
    for (avg, p95, jitter) in [(20.0, 30.0, 2.0), (150.0, 220.0, 15.0), (800.0, 950.0, 80.0)] {
        group.bench_with_input(
            BenchmarkId::new("avg_ms", avg),
            &(avg, p95, jitter),
            |b, &(avg, p95, jitter)| {
                b.iter(|| black_box(score_latency(black_box(avg), black_box(p95), black_box(jitter))));
            },
        );
    }
    group.finish();
}

fn bench_score_packet_loss(c: &mut Criterion) {
    let mut group = c.benchmark_group("score_packet_loss");
    for pct in [0.0, 2.5, 10.0, 30.0] {
        group.bench_with_input(BenchmarkId::new("loss_pct", pct), &pct, |b, &pct| {
            b.iter(|| black_box(score_packet_loss(black_box(pct))));
        });
    }
    group.finish();
}

fn bench_compute_mos(c: &mut Criterion) {
    c.bench_function("compute_mos_typical", |b| {
        b.iter(|| black_box(compute_mos(black_box(35.0), black_box(1.0), black_box(4.0))));
    });
}

fn bench_health_vector(c: &mut Criterion) {
    let metrics = ProbeMetrics {
        mean_latency_ms: 45.0,
        p95_latency_ms: 70.0,
        mean_loss_pct: 1.2,
        mean_jitter_ms: 6.0,
        sample_count: 120,
    };
    c.bench_function("health_vector_per_probe", |b| {
        b.iter(|| black_box(health_vector(black_box(&metrics), black_box(92.0))));
    });
}

criterion_group!(
    benches,
    bench_score_latency,
    bench_score_packet_loss,
    bench_compute_mos,
    bench_health_vector
);
criterion_main!(benches);
