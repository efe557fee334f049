//! Scoring functions (§4.4 "Scoring functions (stable contracts)"). These
//! are pure, deterministic, and clamp-then-round to one decimal so they can
//! be unit-tested against the boundary values named in §8.

use crate::domain::{Grade, HealthVector, ProbeMetrics};

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn lerp(x: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    if (x1 - x0).abs() < f64::EPSILON {
        return y0;
    }
    y0 + (y1 - y0) * ((x - x0) / (x1 - x0))
}

/// Piecewise-linear latency score: `100` at `0ms`, `95` at `30ms`, `80` at
/// `80ms`, `60` at `150ms`, `30` at `300ms`, `0` at `500ms+`.
#[must_use]
pub fn latency_to_score(ms: f64) -> f64 {
    let ms = ms.max(0.0);
    let score = if ms <= 30.0 {
        lerp(ms, 0.0, 100.0, 30.0, 95.0)
    } else if ms <= 80.0 {
        lerp(ms, 30.0, 95.0, 80.0, 80.0)
    } else if ms <= 150.0 {
        lerp(ms, 80.0, 80.0, 150.0, 60.0)
    } else if ms <= 300.0 {
        lerp(ms, 150.0, 60.0, 300.0, 30.0)
    } else if ms <= 500.0 {
        lerp(ms, 300.0, 30.0, 500.0, 0.0)
    } else {
        0.0
    };
    round1(score.clamp(0.0, 100.0))
}

/// Piecewise-linear jitter score: `100` up to `5ms`, `90` at `15ms`, `80` at
/// `30ms`, `60` at `50ms`, `0` at `100ms+`.
#[must_use]
pub fn jitter_to_score(ms: f64) -> f64 {
    let ms = ms.max(0.0);
    let score = if ms <= 5.0 {
        100.0
    } else if ms <= 15.0 {
        lerp(ms, 5.0, 100.0, 15.0, 90.0)
    } else if ms <= 30.0 {
        lerp(ms, 15.0, 90.0, 30.0, 80.0)
    } else if ms <= 50.0 {
        lerp(ms, 30.0, 80.0, 50.0, 60.0)
    } else if ms <= 100.0 {
        lerp(ms, 50.0, 60.0, 100.0, 0.0)
    } else {
        0.0
    };
    round1(score.clamp(0.0, 100.0))
}

/// Composite latency score: `0.5*lat(avg) + 0.3*lat(p95) + 0.2*jit(jitter)`.
#[must_use]
pub fn score_latency(avg_ms: f64, p95_ms: f64, jitter_ms: f64) -> f64 {
    let composite =
        0.5 * latency_to_score(avg_ms) + 0.3 * latency_to_score(p95_ms) + 0.2 * jitter_to_score(jitter_ms);
    round1(composite.clamp(0.0, 100.0))
}

/// Piecewise-linear packet loss score: `100` at `<=0.1%`, `95` at `1%`, `85`
/// at `3%`, `70` at `5%`, `0` at `15%+`.
#[must_use]
pub fn score_packet_loss(pct: f64) -> f64 {
    let pct = pct.max(0.0);
    let score = if pct <= 0.1 {
        100.0
    } else if pct <= 1.0 {
        lerp(pct, 0.1, 100.0, 1.0, 95.0)
    } else if pct <= 3.0 {
        lerp(pct, 1.0, 95.0, 3.0, 85.0)
    } else if pct <= 5.0 {
        lerp(pct, 3.0, 85.0, 5.0, 70.0)
    } else if pct <= 15.0 {
        lerp(pct, 5.0, 70.0, 15.0, 0.0)
    } else {
        0.0
    };
    round1(score.clamp(0.0, 100.0))
}

/// ITU-T E-model simplification (§4.4 `computeMOS`): effective latency =
/// `latency + 2*jitter + 10`; `R = 93.2 - effective/40`, further reduced by
/// `2.5*loss` when `loss > 0`, clamped to `[0, 100]`; MOS derived from `R`
/// via the standard cubic correction, clamped to `[1.0, 4.5]` (§8 "result is
/// always in [1.0, 4.5]").
#[must_use]
pub fn compute_mos(latency_ms: f64, loss_pct: f64, jitter_ms: f64) -> f64 {
    let effective_latency = latency_ms + 2.0 * jitter_ms + 10.0;
    let mut r = 93.2 - effective_latency / 40.0;
    if loss_pct > 0.0 {
        r -= 2.5 * loss_pct;
    }
    let r = r.clamp(0.0, 100.0);
    let mos = 1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7e-6;
    ((mos * 100.0).round() / 100.0).clamp(1.0, 4.5)
}

/// Builds a [`HealthVector`] from lookback metrics, a route stability
/// percent, and the derived MOS (§4.4 `healthVector`):
/// `overall = 0.30*lat + 0.35*loss + 0.15*routeStab + 0.20*mosNorm` where
/// `mosNorm = (mos-1)/3.5*100`.
#[must_use]
pub fn health_vector(metrics: &ProbeMetrics, route_stability_pct: f64) -> HealthVector {
    let latency_score = score_latency(metrics.mean_latency_ms, metrics.p95_latency_ms, metrics.mean_jitter_ms);
    let loss_score = score_packet_loss(metrics.mean_loss_pct);
    let mos = compute_mos(metrics.mean_latency_ms, metrics.mean_loss_pct, metrics.mean_jitter_ms);
    let mos_norm = (mos - 1.0) / 3.5 * 100.0;
    let overall = 0.30 * latency_score + 0.35 * loss_score + 0.15 * route_stability_pct + 0.20 * mos_norm;
    HealthVector {
        latency_score,
        loss_score,
        route_stability: route_stability_pct,
        mos,
        overall: round1(overall.clamp(0.0, 100.0)),
    }
}

/// Buckets an overall score into a [`Grade`] (§4.4 `grade`).
#[must_use]
pub fn grade_from_score(overall: f64) -> Grade {
    Grade::from_score(overall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_boundary_values_are_piecewise_linear() {
        assert_eq!(latency_to_score(0.0), 100.0);
        assert_eq!(latency_to_score(30.0), 95.0);
        assert_eq!(latency_to_score(300.0), 30.0);
        assert_eq!(latency_to_score(1000.0), 0.0);
    }

    #[test]
    fn packet_loss_boundary_values_are_piecewise_linear() {
        assert_eq!(score_packet_loss(0.05), 100.0);
        assert_eq!(score_packet_loss(5.0), 70.0);
        assert!(score_packet_loss(15.0).abs() < 0.01);
    }

    #[test]
    fn mos_decreases_as_latency_loss_and_jitter_worsen() {
        let low_latency_mos = compute_mos(20.0, 0.0, 0.0);
        assert!((low_latency_mos - 4.40).abs() < 0.05);

        let degraded_mos = compute_mos(200.0, 5.0, 20.0);
        assert!(degraded_mos < low_latency_mos);

        assert!((1.0..=4.5).contains(&compute_mos(1000.0, 50.0, 200.0)));
        assert!((1.0..=4.5).contains(&compute_mos(0.0, 0.0, 0.0)));
    }

    #[test]
    fn grade_boundaries_bucket_overall_score() {
        assert_eq!(grade_from_score(89.99), Grade::Good);
        assert_eq!(grade_from_score(90.0), Grade::Excellent);
        assert_eq!(grade_from_score(34.99), Grade::Critical);
    }
}
