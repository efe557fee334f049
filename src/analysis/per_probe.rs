//! Per-probe analysis (§4.4 "Per-probe analysis"): PING/MTR/TRAFFICSIM
//! metrics over a lookback window, derived signals, synthesised findings,
//! and one level of reverse-probe recursion.

use super::scoring::health_vector;
use crate::columnar::{query, ClickHouseClient};
use crate::domain::{
    AgentAnalysis, AgentId, AnalysisFinding, AnalysisSignal, AnalysisSignalKind, AggregationRowCap,
    MtrPathAnalysis, NonRespondingSegment, Probe, ProbeAnalysis, ProbeId, ProbeKind, ProbeMetrics,
    Severity,
};
use crate::domain::{MtrPayload, PingPayload, TrafficSimPayload};
use crate::registry::{self, RegistryError, RegistryStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tracing::instrument;

const RATE_LIMIT_HOP_LOSS_PCT: f64 = 10.0;
const RATE_LIMIT_END_TO_END_LOSS_PCT: f64 = 1.0;
const HIGH_LOSS_THRESHOLD_PCT: f64 = 5.0;
const HIGH_LATENCY_THRESHOLD_MS: f64 = 150.0;
const JITTER_ANOMALY_THRESHOLD_MS: f64 = 50.0;

/// Errors from per-probe analysis.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// A columnar read path failed.
    #[error(transparent)]
    Query(#[from] query::QueryError),
    /// A row's `payload_raw` failed to decode for its declared kind.
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
    /// The registry lookup for a reverse probe failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn percentile_95(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((values.len() as f64) * 0.95).ceil() as usize;
    let idx = rank.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

pub(crate) async fn fetch_ping_metrics(
    client: &ClickHouseClient,
    probe_id: ProbeId,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<ProbeMetrics, AnalysisError> {
    let rows = query::range_by_probe(client, probe_id, since, until, AggregationRowCap::default()).await?;
    if rows.is_empty() {
        return Ok(ProbeMetrics::empty());
    }
    let payloads: Vec<PingPayload> = rows
        .iter()
        .map(|r| serde_json::from_str(&r.payload_raw))
        .collect::<Result<_, _>>()?;
    let n = payloads.len() as f64;
    let latencies: Vec<f64> = payloads.iter().map(|p| p.avg_rtt_ns as f64 / 1e6).collect();
    let mean_latency_ms = latencies.iter().sum::<f64>() / n;
    let p95_latency_ms = percentile_95(latencies);
    let mean_loss_pct = payloads.iter().map(|p| p.loss_pct).sum::<f64>() / n;
    let mean_jitter_ms = payloads.iter().map(|p| p.jitter_ns as f64 / 1e6).sum::<f64>() / n;
    Ok(ProbeMetrics {
        mean_latency_ms,
        p95_latency_ms,
        mean_loss_pct,
        mean_jitter_ms,
        sample_count: payloads.len() as u64,
    })
}

pub(crate) async fn fetch_trafficsim_metrics(
    client: &ClickHouseClient,
    probe_id: ProbeId,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<ProbeMetrics, AnalysisError> {
    let rows = query::range_by_probe(client, probe_id, since, until, AggregationRowCap::default()).await?;
    if rows.is_empty() {
        return Ok(ProbeMetrics::empty());
    }
    let payloads: Vec<TrafficSimPayload> = rows
        .iter()
        .map(|r| serde_json::from_str(&r.payload_raw))
        .collect::<Result<_, _>>()?;
    let n = payloads.len() as f64;
    let mean_latency_ms = payloads.iter().map(|p| p.avg_rtt_ns as f64 / 1e6).sum::<f64>() / n;
    let mean_loss_pct = payloads.iter().map(TrafficSimPayload::loss_pct).sum::<f64>() / n;
    Ok(ProbeMetrics {
        mean_latency_ms,
        p95_latency_ms: mean_latency_ms,
        mean_loss_pct,
        mean_jitter_ms: 0.0,
        sample_count: payloads.len() as u64,
    })
}

fn non_responding_segments(hops: &[crate::domain::MtrHop]) -> Vec<NonRespondingSegment> {
    let mut segments = Vec::new();
    let mut run_start: Option<u32> = None;
    for hop in hops {
        if hop.is_responding() {
            if let Some(start) = run_start.take() {
                segments.push(NonRespondingSegment {
                    from_hop: start,
                    to_hop: hop.hop - 1,
                });
            }
        } else if run_start.is_none() {
            run_start = Some(hop.hop);
        }
    }
    if let Some(start) = run_start {
        let last_hop = hops.last().map_or(start, |h| h.hop);
        segments.push(NonRespondingSegment {
            from_hop: start,
            to_hop: last_hop,
        });
    }
    segments
}

pub(crate) async fn fetch_mtr_analysis(
    client: &ClickHouseClient,
    probe_id: ProbeId,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Option<MtrPathAnalysis>, AnalysisError> {
    let rows = query::range_by_probe(client, probe_id, since, until, AggregationRowCap::default()).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let traces: Vec<MtrPayload> = rows
        .iter()
        .map(|r| serde_json::from_str(&r.payload_raw))
        .collect::<Result<_, _>>()?;

    let hop_count = traces.iter().map(|t| t.hops.len() as u32).max().unwrap_or(0);

    let mut signature_counts: HashMap<String, u32> = HashMap::new();
    for trace in &traces {
        *signature_counts.entry(trace.route_signature()).or_insert(0) += 1;
    }
    let unique_route_count = signature_counts.len() as u32;
    let max_matching = signature_counts.values().max().copied().unwrap_or(0);
    let route_stability_pct = if traces.is_empty() {
        100.0
    } else {
        (f64::from(max_matching) / traces.len() as f64) * 100.0
    };

    let end_hop_latencies: Vec<f64> = traces
        .iter()
        .filter_map(|t| t.last_responding_hop())
        .map(|h| h.avg_rtt_ns as f64 / 1e6)
        .collect();
    let mean_end_hop_latency_ms = if end_hop_latencies.is_empty() {
        0.0
    } else {
        end_hop_latencies.iter().sum::<f64>() / end_hop_latencies.len() as f64
    };
    let end_hop_losses: Vec<f64> = traces.iter().map(MtrPayload::end_to_end_loss_pct).collect();
    let mean_end_hop_loss_pct = end_hop_losses.iter().sum::<f64>() / traces.len() as f64;

    let mut rate_limited_hops: Vec<u32> = Vec::new();
    let mut non_responding_segments_out: Vec<NonRespondingSegment> = Vec::new();
    if let Some(last_trace) = traces.last() {
        let end_to_end_loss = last_trace.end_to_end_loss_pct();
        if end_to_end_loss < RATE_LIMIT_END_TO_END_LOSS_PCT {
            for hop in &last_trace.hops {
                if hop.is_responding() && hop.loss_pct > RATE_LIMIT_HOP_LOSS_PCT {
                    rate_limited_hops.push(hop.hop);
                }
            }
        }
        non_responding_segments_out = non_responding_segments(&last_trace.hops);
    }

    Ok(Some(MtrPathAnalysis {
        hop_count,
        unique_route_count,
        route_stability_pct,
        mean_end_hop_latency_ms,
        mean_end_hop_loss_pct,
        rate_limited_hops,
        non_responding_segments: non_responding_segments_out,
    }))
}

fn derive_signals(metrics: &ProbeMetrics, mtr: Option<&MtrPathAnalysis>) -> Vec<AnalysisSignal> {
    let mut signals = Vec::new();
    if let Some(mtr) = mtr {
        if !mtr.rate_limited_hops.is_empty() {
            signals.push(AnalysisSignal {
                kind: AnalysisSignalKind::IcmpArtifact,
                confidence: 0.8,
            });
        }
        if mtr.unique_route_count > 1 {
            signals.push(AnalysisSignal {
                kind: AnalysisSignalKind::RouteChange,
                confidence: (100.0 - mtr.route_stability_pct) / 100.0,
            });
        }
    }
    if metrics.mean_loss_pct > HIGH_LOSS_THRESHOLD_PCT {
        signals.push(AnalysisSignal {
            kind: AnalysisSignalKind::HighLoss,
            confidence: (metrics.mean_loss_pct / 100.0).min(1.0),
        });
    }
    if metrics.mean_latency_ms > HIGH_LATENCY_THRESHOLD_MS {
        signals.push(AnalysisSignal {
            kind: AnalysisSignalKind::HighLatency,
            confidence: (metrics.mean_latency_ms / 500.0).min(1.0),
        });
    }
    if metrics.mean_jitter_ms > JITTER_ANOMALY_THRESHOLD_MS {
        signals.push(AnalysisSignal {
            kind: AnalysisSignalKind::JitterAnomaly,
            confidence: (metrics.mean_jitter_ms / 100.0).min(1.0),
        });
    }
    signals
}

fn synthesize_findings(
    health: &crate::domain::HealthVector,
    signals: &[AnalysisSignal],
) -> Vec<AnalysisFinding> {
    let mut findings = Vec::new();
    let grade = health.grade();
    findings.push(AnalysisFinding {
        title: format!("Overall grade: {grade:?}"),
        detail: format!(
            "Composite health score is {:.1} (latency {:.1}, loss {:.1}, route stability {:.1}, MOS {:.2}).",
            health.overall, health.latency_score, health.loss_score, health.route_stability, health.mos
        ),
        severity: if grade.is_degraded() { Severity::Warning } else { Severity::Info },
    });

    if signals.iter().any(|s| s.kind == AnalysisSignalKind::IcmpArtifact) {
        findings.push(AnalysisFinding {
            title: "Loss pattern consistent with ICMP rate-limiting".to_string(),
            detail: "Intermediate hops show elevated loss while end-to-end loss remains low, \
                     suggesting router-level ICMP rate-limiting rather than real packet loss."
                .to_string(),
            severity: Severity::Info,
        });
    }

    if signals.iter().any(|s| s.kind == AnalysisSignalKind::RouteChange) {
        findings.push(AnalysisFinding {
            title: "Route instability detected".to_string(),
            detail: "Multiple distinct route signatures were observed within the analysis window."
                .to_string(),
            severity: Severity::Warning,
        });
    }

    findings.truncate(3);
    findings
}

struct ProbeCore {
    metrics: ProbeMetrics,
    mtr: Option<MtrPathAnalysis>,
    health: crate::domain::HealthVector,
    signals: Vec<AnalysisSignal>,
    findings: Vec<AnalysisFinding>,
}

async fn compute_core(
    client: &ClickHouseClient,
    probe: &Probe,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ProbeCore, AnalysisError> {
    let mut metrics = fetch_ping_metrics(client, probe.id, window_start, now).await?;
    let mtr = fetch_mtr_analysis(client, probe.id, window_start, now).await?;

    if probe.kind == ProbeKind::Agent {
        let trafficsim = fetch_trafficsim_metrics(client, probe.id, window_start, now).await?;
        metrics = metrics.blend_with_trafficsim(&trafficsim);
    }

    let route_stability = mtr.as_ref().map_or(100.0, |m| m.route_stability_pct);
    let health = health_vector(&metrics, route_stability);
    let signals = derive_signals(&metrics, mtr.as_ref());
    let findings = synthesize_findings(&health, &signals);

    Ok(ProbeCore {
        metrics,
        mtr,
        health,
        signals,
        findings,
    })
}

/// Runs per-probe analysis over `probe` for the trailing `window` with no
/// reverse-probe recursion — used for the reverse leg itself, since reverse
/// analysis never nests further (§9 "cap recursion at depth 1").
///
/// # Errors
///
/// Returns [`AnalysisError`] if a columnar read or payload decode fails.
#[instrument(skip(client), fields(probe_id = %probe.id), err)]
pub async fn analyze_probe_leaf(
    client: &ClickHouseClient,
    probe: &Probe,
    window: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<ProbeAnalysis, AnalysisError> {
    let window_duration = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::minutes(60));
    let window_start = now - window_duration;
    let core = compute_core(client, probe, window_start, now).await?;
    Ok(ProbeAnalysis {
        probe_id: probe.id,
        agent_id: probe.agent_id,
        window_start,
        window_end: now,
        metrics: core.metrics,
        mtr: core.mtr,
        health: core.health,
        signals: core.signals,
        findings: core.findings,
        reverse: None,
    })
}

/// Runs per-probe analysis over `probe` for the trailing `window`, blending
/// in `TRAFFICSIM` for `AGENT` meta-probes, and recursing once into a
/// reverse probe if one exists (§4.4, §9 "cap recursion at depth 1").
///
/// # Errors
///
/// Returns [`AnalysisError`] if a columnar read, payload decode, or registry
/// lookup fails.
#[instrument(skip(client, store), fields(probe_id = %probe.id), err)]
pub async fn analyze_probe(
    client: &ClickHouseClient,
    store: &dyn RegistryStore,
    probe: &Probe,
    window: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<ProbeAnalysis, AnalysisError> {
    let window_duration = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::minutes(60));
    let window_start = now - window_duration;
    let core = compute_core(client, probe, window_start, now).await?;

    let candidates = registry::find_reverse_probes(store, probe.agent_id).await?;
    let reverse = match candidates.into_iter().find(|p| p.id != probe.id) {
        Some(reverse_probe) => Some(Box::new(analyze_probe_leaf(client, &reverse_probe, window, now).await?)),
        None => None,
    };

    Ok(ProbeAnalysis {
        probe_id: probe.id,
        agent_id: probe.agent_id,
        window_start,
        window_end: now,
        metrics: core.metrics,
        mtr: core.mtr,
        health: core.health,
        signals: core.signals,
        findings: core.findings,
        reverse,
    })
}

/// Ranks a set of already-computed per-probe health scores, lowest first,
/// returning the worst three (§4.4 "three-by-three worst probes per agent").
#[must_use]
pub fn worst_three(mut scored: Vec<(ProbeId, f64)>) -> Vec<ProbeId> {
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(3).map(|(id, _)| id).collect()
}

/// Builds the per-agent rollup for an agent whose probes have already been
/// scored (§4.4 "Workspace analysis": "Compute per-agent sub-score
/// averages"). Each dimension of the per-probe [`crate::domain::HealthVector`]s
/// is averaged independently, rather than collapsing to the mean of
/// `overall` alone, so a workspace with excellent latency but terrible loss
/// doesn't report both sub-scores as the same middling number.
#[must_use]
pub fn agent_rollup(
    agent_id: AgentId,
    online: bool,
    scored: &[(ProbeId, crate::domain::HealthVector)],
    freshness_penalty: f64,
) -> AgentAnalysis {
    let n = scored.len().max(1) as f64;
    let mean = |f: fn(&crate::domain::HealthVector) -> f64| scored.iter().map(|(_, h)| f(h)).sum::<f64>() / n;
    let mut health = crate::domain::HealthVector {
        latency_score: mean(|h| h.latency_score),
        loss_score: mean(|h| h.loss_score),
        route_stability: mean(|h| h.route_stability),
        mos: mean(|h| h.mos),
        overall: mean(|h| h.overall),
    };
    if !online {
        health = health.penalized(freshness_penalty);
    }
    let overalls: Vec<(ProbeId, f64)> = scored.iter().map(|(id, h)| (*id, h.overall)).collect();
    AgentAnalysis {
        agent_id,
        online,
        health,
        worst_probes: worst_three(overalls),
    }
}
