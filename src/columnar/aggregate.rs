//! Time-bucket aggregation on read (§4.3 "Time-bucket aggregation
//! (read-side)"). A pure function from `(rows, bucket_duration, limit)` to
//! aggregated rows — deterministic and independent of wall-clock so it can
//! be unit-tested against fixture data (§9).

use super::query::ProbeDataRow;
use crate::domain::{MtrPayload, PingPayload, TrafficSimPayload};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

const HIGH_LOSS_THRESHOLD_PCT: f64 = 10.0;
const HIGH_LATENCY_THRESHOLD_MS: f64 = 150.0;

fn bucket_start(ts: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    let bucket_secs = bucket.as_secs().max(1) as i64;
    let epoch = ts.timestamp();
    let floored = (epoch.div_euclid(bucket_secs)) * bucket_secs;
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

/// One `PING` bucket (§4.3 "PING": mean of mean-RTT, min of min-RTT, max of
/// max-RTT, mean of loss, sum of packets sent/received; RTTs converted from
/// nanoseconds to milliseconds at the aggregator boundary).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingBucket {
    /// Start of this bucket.
    pub bucket_start: DateTime<Utc>,
    /// Mean of per-sample mean RTT, milliseconds.
    pub mean_rtt_ms: f64,
    /// Minimum of per-sample minimum RTT, milliseconds.
    pub min_rtt_ms: f64,
    /// Maximum of per-sample maximum RTT, milliseconds.
    pub max_rtt_ms: f64,
    /// Mean packet loss percent.
    pub mean_loss_pct: f64,
    /// Sum of packets sent across all samples in the bucket.
    pub sent_total: u64,
    /// Sum of packets received across all samples in the bucket.
    pub received_total: u64,
    /// Number of samples folded into this bucket.
    pub sample_count: u32,
}

/// Aggregates decoded `PING` rows into per-bucket summaries, newest first.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if any row's `payload_raw` does not
/// decode as a `PING` payload.
pub fn aggregate_ping(
    rows: &[ProbeDataRow],
    bucket: Duration,
) -> Result<Vec<PingBucket>, serde_json::Error> {
    let mut buckets: HashMap<DateTime<Utc>, Vec<PingPayload>> = HashMap::new();
    for row in rows {
        let payload: PingPayload = serde_json::from_str(&row.payload_raw)?;
        buckets
            .entry(bucket_start(row.created_at, bucket))
            .or_default()
            .push(payload);
    }

    let mut out: Vec<PingBucket> = buckets
        .into_iter()
        .map(|(start, samples)| {
            let n = samples.len() as f64;
            let mean_rtt_ms =
                samples.iter().map(|s| s.avg_rtt_ns as f64 / 1e6).sum::<f64>() / n;
            let min_rtt_ms = samples
                .iter()
                .map(|s| s.min_rtt_ns as f64 / 1e6)
                .fold(f64::INFINITY, f64::min);
            let max_rtt_ms = samples
                .iter()
                .map(|s| s.max_rtt_ns as f64 / 1e6)
                .fold(f64::NEG_INFINITY, f64::max);
            let mean_loss_pct = samples.iter().map(|s| s.loss_pct).sum::<f64>() / n;
            let sent_total = samples.iter().map(|s| u64::from(s.sent)).sum();
            let received_total = samples.iter().map(|s| u64::from(s.received)).sum();
            PingBucket {
                bucket_start: start,
                mean_rtt_ms,
                min_rtt_ms,
                max_rtt_ms,
                mean_loss_pct,
                sent_total,
                received_total,
                sample_count: samples.len() as u32,
            }
        })
        .collect();
    out.sort_by(|a, b| b.bucket_start.cmp(&a.bucket_start));
    Ok(out)
}

/// One `TRAFFICSIM` bucket (§4.3 "TRAFFICSIM": mean of avg-RTT, running
/// min/max, sums of total/lost/out-of-sequence/duplicate packets).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSimBucket {
    /// Start of this bucket.
    pub bucket_start: DateTime<Utc>,
    /// Mean of per-sample average RTT, milliseconds.
    pub mean_rtt_ms: f64,
    /// Minimum observed average RTT in the bucket, milliseconds.
    pub min_rtt_ms: f64,
    /// Maximum observed average RTT in the bucket, milliseconds.
    pub max_rtt_ms: f64,
    /// Sum of total packets sent.
    pub total_sent: u64,
    /// Sum of packets lost.
    pub total_lost: u64,
    /// Sum of out-of-sequence packets.
    pub total_out_of_sequence: u64,
    /// Sum of duplicate packets.
    pub total_duplicate: u64,
    /// Number of samples folded into this bucket.
    pub sample_count: u32,
}

/// Aggregates decoded `TRAFFICSIM` rows into per-bucket summaries, newest
/// first (§4.3 "TRAFFICSIM").
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if any row's `payload_raw` does not
/// decode as a `TRAFFICSIM` payload.
pub fn aggregate_trafficsim(
    rows: &[ProbeDataRow],
    bucket: Duration,
) -> Result<Vec<TrafficSimBucket>, serde_json::Error> {
    let mut buckets: HashMap<DateTime<Utc>, Vec<TrafficSimPayload>> = HashMap::new();
    for row in rows {
        let payload: TrafficSimPayload = serde_json::from_str(&row.payload_raw)?;
        buckets
            .entry(bucket_start(row.created_at, bucket))
            .or_default()
            .push(payload);
    }

    let mut out: Vec<TrafficSimBucket> = buckets
        .into_iter()
        .map(|(start, samples)| {
            let n = samples.len() as f64;
            let mean_rtt_ms =
                samples.iter().map(|s| s.avg_rtt_ns as f64 / 1e6).sum::<f64>() / n;
            let min_rtt_ms = samples
                .iter()
                .map(|s| s.avg_rtt_ns as f64 / 1e6)
                .fold(f64::INFINITY, f64::min);
            let max_rtt_ms = samples
                .iter()
                .map(|s| s.avg_rtt_ns as f64 / 1e6)
                .fold(f64::NEG_INFINITY, f64::max);
            TrafficSimBucket {
                bucket_start: start,
                mean_rtt_ms,
                min_rtt_ms,
                max_rtt_ms,
                total_sent: samples.iter().map(|s| s.total_sent).sum(),
                total_lost: samples.iter().map(|s| s.lost).sum(),
                total_out_of_sequence: samples.iter().map(|s| s.out_of_sequence).sum(),
                total_duplicate: samples.iter().map(|s| s.duplicate).sum(),
                sample_count: samples.len() as u32,
            }
        })
        .collect();
    out.sort_by(|a, b| b.bucket_start.cmp(&a.bucket_start));
    Ok(out)
}

/// A fused hop within an aggregated (non-notable) `MTR` bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedHop {
    /// 1-based hop index.
    pub hop: u32,
    /// Responding address, if any trace in the fusion saw one.
    pub address: Option<String>,
    /// Sum of packets sent across fused traces.
    pub sent: u32,
    /// Sum of packets received across fused traces.
    pub received: u32,
    /// Recomputed loss percent, `(sent - received) / sent * 100`.
    pub loss_pct: f64,
    /// Mean of per-trace average RTT, nanoseconds.
    pub avg_rtt_ns: u64,
    /// Minimum of per-trace best RTT, nanoseconds.
    pub best_rtt_ns: u64,
    /// Maximum of per-trace worst RTT, nanoseconds.
    pub worst_rtt_ns: u64,
}

/// An `MTR` trace preserved individually because it is notable (§4.3,
/// Glossary "Notable trace").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotableMtrTrace {
    /// Start of the bucket this trace falls in.
    pub bucket_start: DateTime<Utc>,
    /// This trace's timestamp.
    pub created_at: DateTime<Utc>,
    /// This trace's route signature.
    pub route_signature: String,
    /// The immediately preceding trace's route signature, if any.
    pub previous_route_signature: Option<String>,
    /// Always `1` for a preserved-individual trace.
    pub trace_count: u32,
    /// Comma-joined reasons this trace was deemed notable, e.g.
    /// `"triggered,route-change"`.
    pub reason: String,
}

/// A group of non-notable `MTR` traces sharing a bucket's primary route
/// signature, fused hop-by-hop (§4.3 "MTR").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMtrTrace {
    /// Start of this bucket.
    pub bucket_start: DateTime<Utc>,
    /// The bucket's primary route signature.
    pub route_signature: String,
    /// Number of traces fused into this row.
    pub trace_count: u32,
    /// Fused per-hop statistics.
    pub hops: Vec<FusedHop>,
}

/// One row of `MTR` aggregation output: either a notable trace preserved
/// individually, or a fused group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "variant")]
pub enum MtrAggregateItem {
    /// Preserved individually (§4.3, Glossary "Notable trace").
    Notable(NotableMtrTrace),
    /// Fused from the bucket's primary (highest-count) route signature.
    Aggregated(AggregatedMtrTrace),
}

impl MtrAggregateItem {
    fn sort_key(&self) -> DateTime<Utc> {
        match self {
            Self::Notable(t) => t.created_at,
            Self::Aggregated(t) => t.bucket_start,
        }
    }
}

fn notability_reasons(payload: &MtrPayload, triggered: bool, previous_signature: Option<&str>) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    let signature = payload.route_signature();
    if triggered {
        reasons.push("triggered");
    }
    if previous_signature.is_some_and(|prev| prev != signature) {
        reasons.push("route-change");
    }
    if payload
        .hops
        .iter()
        .any(|h| h.is_responding() && h.loss_pct > HIGH_LOSS_THRESHOLD_PCT)
    {
        reasons.push("high-loss");
    }
    if let Some(last) = payload.last_responding_hop() {
        if last.avg_rtt_ns as f64 / 1e6 > HIGH_LATENCY_THRESHOLD_MS {
            reasons.push("high-latency");
        }
    }
    reasons
}

fn fuse_traces(bucket_start: DateTime<Utc>, signature: &str, traces: &[MtrPayload]) -> AggregatedMtrTrace {
    let hop_count = traces.iter().map(|t| t.hops.len()).max().unwrap_or(0);
    let mut hops = Vec::with_capacity(hop_count);
    for idx in 0..hop_count {
        let contributing: Vec<_> = traces.iter().filter_map(|t| t.hops.get(idx)).collect();
        if contributing.is_empty() {
            continue;
        }
        let sent: u32 = contributing.iter().map(|h| h.sent).sum();
        let received: u32 = contributing.iter().map(|h| h.received).sum();
        let loss_pct = if sent == 0 {
            0.0
        } else {
            ((sent - received) as f64 / sent as f64) * 100.0
        };
        let avg_rtt_ns =
            (contributing.iter().map(|h| h.avg_rtt_ns as f64).sum::<f64>() / contributing.len() as f64) as u64;
        let best_rtt_ns = contributing.iter().map(|h| h.best_rtt_ns).min().unwrap_or(0);
        let worst_rtt_ns = contributing.iter().map(|h| h.worst_rtt_ns).max().unwrap_or(0);
        let address = contributing.iter().find_map(|h| h.address.clone());
        hops.push(FusedHop {
            hop: contributing[0].hop,
            address,
            sent,
            received,
            loss_pct,
            avg_rtt_ns,
            best_rtt_ns,
            worst_rtt_ns,
        });
    }
    AggregatedMtrTrace {
        bucket_start,
        route_signature: signature.to_string(),
        trace_count: traces.len() as u32,
        hops,
    }
}

/// Aggregates decoded `MTR` rows per §4.3's notable/fusion algorithm,
/// newest-first, capped at `limit` output rows.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if any row's `payload_raw` does not
/// decode as an `MTR` payload.
pub fn aggregate_mtr(
    rows: &[ProbeDataRow],
    bucket: Duration,
    limit: usize,
) -> Result<Vec<MtrAggregateItem>, serde_json::Error> {
    let mut chronological: Vec<(DateTime<Utc>, bool, MtrPayload)> = rows
        .iter()
        .map(|row| -> Result<_, serde_json::Error> {
            Ok((row.created_at, row.triggered, serde_json::from_str::<MtrPayload>(&row.payload_raw)?))
        })
        .collect::<Result<_, _>>()?;
    chronological.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    let mut grouped: HashMap<(DateTime<Utc>, String), Vec<MtrPayload>> = HashMap::new();
    let mut previous_signature: Option<String> = None;

    for (created_at, triggered, payload) in chronological {
        let signature = payload.route_signature();
        let reasons = notability_reasons(&payload, triggered, previous_signature.as_deref());
        let start = bucket_start(created_at, bucket);

        if reasons.is_empty() {
            grouped
                .entry((start, signature.clone()))
                .or_default()
                .push(payload);
        } else {
            out.push(MtrAggregateItem::Notable(NotableMtrTrace {
                bucket_start: start,
                created_at,
                route_signature: signature.clone(),
                previous_route_signature: previous_signature.clone(),
                trace_count: 1,
                reason: reasons.join(","),
            }));
        }
        previous_signature = Some(signature);
    }

    let mut by_bucket: HashMap<DateTime<Utc>, Vec<(String, Vec<MtrPayload>)>> = HashMap::new();
    for ((start, signature), traces) in grouped {
        by_bucket.entry(start).or_default().push((signature, traces));
    }
    for (start, mut groups) in by_bucket {
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        if let Some((signature, traces)) = groups.into_iter().next() {
            out.push(MtrAggregateItem::Aggregated(fuse_traces(start, &signature, &traces)));
        }
    }

    out.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    out.truncate(limit);
    Ok(out)
}

/// One "other kind" bucket: time-bucketed, keeping only the newest raw row
/// (§4.3 "Other kinds").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtherBucket {
    /// Start of this bucket.
    pub bucket_start: DateTime<Utc>,
    /// The newest raw row falling in this bucket.
    pub newest: ProbeDataRow,
}

impl Eq for OtherBucket {}

/// Buckets any non-`PING`/`MTR` kind by time, keeping the newest sample per
/// bucket (§4.3 "Other kinds"), newest-first.
#[must_use]
pub fn aggregate_other(rows: &[ProbeDataRow], bucket: Duration) -> Vec<OtherBucket> {
    let mut buckets: HashMap<DateTime<Utc>, &ProbeDataRow> = HashMap::new();
    for row in rows {
        let start = bucket_start(row.created_at, bucket);
        buckets
            .entry(start)
            .and_modify(|existing| {
                if row.created_at > existing.created_at {
                    *existing = row;
                }
            })
            .or_insert(row);
    }
    let mut out: Vec<OtherBucket> = buckets
        .into_iter()
        .map(|(start, row)| OtherBucket {
            bucket_start: start,
            newest: row.clone(),
        })
        .collect();
    out.sort_by(|a, b| b.bucket_start.cmp(&a.bucket_start));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentId, ProbeId, ProbeKind};
    use chrono::TimeZone;

    fn mk_row(created_at: DateTime<Utc>, triggered: bool, payload: &str) -> ProbeDataRow {
        ProbeDataRow {
            id: 1,
            created_at,
            received_at: created_at,
            kind: ProbeKind::Mtr,
            probe_id: ProbeId::generate(),
            probe_agent_id: AgentId::generate(),
            agent_id: AgentId::generate(),
            triggered,
            triggered_reason: String::new(),
            target: "8.8.8.8".to_string(),
            target_agent: String::new(),
            payload_raw: payload.to_string(),
        }
    }

    fn hop(n: u32, addr: Option<&str>, loss: f64) -> String {
        format!(
            r#"{{"hop":{n},"address":{},"sent":10,"received":10,"loss_pct":{loss},"avg_rtt_ns":10000000,"best_rtt_ns":9000000,"worst_rtt_ns":11000000}}"#,
            addr.map_or("null".to_string(), |a| format!("\"{a}\""))
        )
    }

    fn trace(hops: &[String]) -> String {
        format!(r#"{{"hops":[{}]}}"#, hops.join(","))
    }

    #[test]
    fn mtr_aggregation_preserves_notable_and_fuses_the_rest() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let abc = trace(&[hop(1, Some("10.0.0.1"), 0.0), hop(2, Some("8.8.8.8"), 0.0)]);
        let abd = trace(&[hop(1, Some("10.0.0.1"), 0.0), hop(2, Some("8.8.4.4"), 0.0)]);

        let rows = vec![
            mk_row(t0, false, &abc),
            mk_row(t0 + chrono::Duration::seconds(10), false, &abc),
            mk_row(t0 + chrono::Duration::seconds(20), true, &abd),
        ];

        let result = aggregate_mtr(&rows, Duration::from_secs(60), 10).unwrap();
        let notable: Vec<_> = result
            .iter()
            .filter_map(|item| match item {
                MtrAggregateItem::Notable(t) => Some(t),
                MtrAggregateItem::Aggregated(_) => None,
            })
            .collect();
        assert_eq!(notable.len(), 1);
        assert_eq!(notable[0].reason, "triggered,route-change");

        let aggregated: Vec<_> = result
            .iter()
            .filter_map(|item| match item {
                MtrAggregateItem::Aggregated(t) => Some(t),
                MtrAggregateItem::Notable(_) => None,
            })
            .collect();
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].trace_count, 2);
    }

    #[test]
    fn ping_bucket_converts_nanoseconds_to_milliseconds() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let row = ProbeDataRow {
            id: 1,
            created_at: t0,
            received_at: t0,
            kind: ProbeKind::Ping,
            probe_id: ProbeId::generate(),
            probe_agent_id: AgentId::generate(),
            agent_id: AgentId::generate(),
            triggered: false,
            triggered_reason: String::new(),
            target: "1.1.1.1".to_string(),
            target_agent: String::new(),
            payload_raw: r#"{"sent":10,"received":10,"loss_pct":0.0,"min_rtt_ns":1000000,"avg_rtt_ns":2000000,"max_rtt_ns":3000000,"jitter_ns":100000}"#.to_string(),
        };
        let buckets = aggregate_ping(&[row], Duration::from_secs(60)).unwrap();
        assert_eq!(buckets.len(), 1);
        assert!((buckets[0].mean_rtt_ms - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn other_kind_bucket_keeps_newest_sample() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let older = ProbeDataRow {
            id: 1,
            created_at: t0,
            received_at: t0,
            kind: ProbeKind::SysInfo,
            probe_id: ProbeId::generate(),
            probe_agent_id: AgentId::generate(),
            agent_id: AgentId::generate(),
            triggered: false,
            triggered_reason: String::new(),
            target: "self".to_string(),
            target_agent: String::new(),
            payload_raw: "{}".to_string(),
        };
        let mut newer = older.clone();
        newer.created_at = t0 + chrono::Duration::seconds(5);
        newer.id = 2;
        let buckets = aggregate_other(&[older, newer], Duration::from_secs(60));
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].newest.id, 2);
    }
}
