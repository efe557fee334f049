//! End-to-end precision checks for the scoring pipeline: feeding a known
//! `ProbeMetrics`/route-stability pair through `health_vector` and checking
//! every sub-score lands within tolerance of its hand-computed value.

use approx::assert_relative_eq;
use netwatcher_controller::analysis::scoring::{health_vector, score_latency, score_packet_loss};
use netwatcher_controller::domain::ProbeMetrics;

#[test]
fn pristine_link_scores_near_the_top_of_every_dimension() {
    let metrics = ProbeMetrics {
        mean_latency_ms: 5.0,
        p95_latency_ms: 8.0,
        mean_loss_pct: 0.0,
        mean_jitter_ms: 1.0,
        sample_count: 60,
    };
    let health = health_vector(&metrics, 100.0);
    assert_relative_eq!(health.latency_score, 100.0, epsilon = 0.5);
    assert_relative_eq!(health.loss_score, 100.0, epsilon = 0.5);
    assert_relative_eq!(health.route_stability, 100.0, epsilon = 0.01);
    assert!(health.overall > 95.0, "overall {} should be near-perfect", health.overall);
}

#[test]
fn congested_link_drags_down_the_composite_score() {
    let metrics = ProbeMetrics {
        mean_latency_ms: 400.0,
        p95_latency_ms: 600.0,
        mean_jitter_ms: 90.0,
        mean_loss_pct: 12.0,
        sample_count: 60,
    };
    let health = health_vector(&metrics, 40.0);
    assert!(health.overall < 40.0, "overall {} should reflect the congestion", health.overall);
}

#[test]
fn score_latency_weighting_matches_the_documented_composite() {
    let avg = 20.0;
    let p95 = 40.0;
    let jitter = 10.0;
    let composite = score_latency(avg, p95, jitter);
    let expected = 0.5f64.mul_add(
        netwatcher_controller::analysis::scoring::latency_to_score(avg),
        0.3 * netwatcher_controller::analysis::scoring::latency_to_score(p95)
            + 0.2 * netwatcher_controller::analysis::scoring::jitter_to_score(jitter),
    );
    assert_relative_eq!(composite, expected, epsilon = 0.1);
}

#[test]
fn packet_loss_score_is_monotonically_non_increasing() {
    let samples = [0.0, 0.5, 1.0, 3.0, 5.0, 10.0, 15.0, 25.0];
    let scores: Vec<f64> = samples.iter().map(|&pct| score_packet_loss(pct)).collect();
    for window in scores.windows(2) {
        assert!(window[0] >= window[1], "packet loss score should never increase as loss grows");
    }
}
