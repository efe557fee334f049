//! Read paths over `probe_data` (§4.3 "Range by probe", "Flexible finder",
//! "Latest by kind+agent").
//!
//! Every predicate is rendered through [`super::quoting`] rather than bound
//! as a driver parameter (§9 "SQL literal safety").

use super::client::{ClickHouseClient, ClickHouseError};
use super::quoting::{like_prefix, quote_bool, quote_string, quote_timestamp};
use crate::domain::{AgentId, AggregationRowCap, ProbeId, ProbeKind, SampleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

/// Errors from a `probe_data` read path.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The HTTP round-trip to the columnar store failed.
    #[error(transparent)]
    Store(#[from] ClickHouseError),
    /// A row in the response body did not decode as JSON.
    #[error("malformed row in columnar response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One decoded `probe_data` row, as returned by a read path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDataRow {
    /// Row surrogate key.
    pub id: u64,
    /// When the observation was made, UTC.
    pub created_at: DateTime<Utc>,
    /// When the controller received it, UTC.
    pub received_at: DateTime<Utc>,
    /// Probe kind, low-cardinality string.
    #[serde(rename = "type")]
    pub kind: ProbeKind,
    /// Owning probe.
    pub probe_id: ProbeId,
    /// Owning agent.
    pub probe_agent_id: AgentId,
    /// Reporting agent.
    pub agent_id: AgentId,
    /// Whether the sample was agent-triggered.
    pub triggered: bool,
    /// Free-form trigger reason.
    pub triggered_reason: String,
    /// Literal target string measured against.
    pub target: String,
    /// Target agent id, empty string when the target was literal.
    #[serde(default)]
    pub target_agent: String,
    /// Verbatim JSON payload as received.
    pub payload_raw: String,
}

fn parse_jsoneachrow(body: &str) -> Result<Vec<ProbeDataRow>, QueryError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(QueryError::from))
        .collect()
}

/// Returns every `probe_data` row for `probe_id` within `[since, until]`,
/// newest first, capped at `limit` rows (§4.3 "Range by probe", §9's
/// aggregation hard cap applies equally to a raw range read).
///
/// # Errors
///
/// Returns [`QueryError`] on a failed round-trip or malformed response body.
#[instrument(skip(client), err)]
pub async fn range_by_probe(
    client: &ClickHouseClient,
    probe_id: ProbeId,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: AggregationRowCap,
) -> Result<Vec<ProbeDataRow>, QueryError> {
    let sql = format!(
        "SELECT id, created_at, received_at, type, probe_id, probe_agent_id, agent_id, \
         triggered, triggered_reason, target, target_agent, payload_raw FROM probe_data \
         WHERE probe_id = {} AND created_at >= {} AND created_at <= {} \
         ORDER BY created_at DESC LIMIT {} FORMAT JSONEachRow",
        quote_string(&probe_id.to_string()),
        quote_timestamp(since),
        quote_timestamp(until),
        limit.as_usize(),
    );
    let body = client.query(&sql).await?;
    Ok(parse_jsoneachrow(&body)?)
}

/// Returns the most recent `probe_data` row for (`kind`, `agent_id`), if any
/// (§4.3 "Latest by kind+agent" — used for `NETINFO` lookups and the
/// baseline/incident windows).
///
/// # Errors
///
/// Returns [`QueryError`] on a failed round-trip or malformed response body.
#[instrument(skip(client), err)]
pub async fn latest_by_kind_agent(
    client: &ClickHouseClient,
    kind: ProbeKind,
    agent_id: AgentId,
) -> Result<Option<ProbeDataRow>, QueryError> {
    let sql = format!(
        "SELECT id, created_at, received_at, type, probe_id, probe_agent_id, agent_id, \
         triggered, triggered_reason, target, target_agent, payload_raw FROM probe_data \
         WHERE type = {} AND agent_id = {} ORDER BY created_at DESC LIMIT 1 FORMAT JSONEachRow",
        quote_string(kind_str(kind)),
        quote_string(&agent_id.to_string()),
    );
    let body = client.query(&sql).await?;
    Ok(parse_jsoneachrow(&body)?.into_iter().next())
}

/// The most recent N (`kind`, `agent_id`) rows, newest first — used by
/// baseline regression and `NETINFO`-change detection, which both need at
/// least the newest two samples to compare against.
///
/// # Errors
///
/// Returns [`QueryError`] on a failed round-trip or malformed response body.
#[instrument(skip(client), err)]
pub async fn latest_n_by_kind_agent(
    client: &ClickHouseClient,
    kind: ProbeKind,
    agent_id: AgentId,
    n: u32,
) -> Result<Vec<ProbeDataRow>, QueryError> {
    let sql = format!(
        "SELECT id, created_at, received_at, type, probe_id, probe_agent_id, agent_id, \
         triggered, triggered_reason, target, target_agent, payload_raw FROM probe_data \
         WHERE type = {} AND agent_id = {} ORDER BY created_at DESC LIMIT {} FORMAT JSONEachRow",
        quote_string(kind_str(kind)),
        quote_string(&agent_id.to_string()),
        n,
    );
    let body = client.query(&sql).await?;
    Ok(parse_jsoneachrow(&body)?)
}

/// Filter set for the flexible finder (§4.3 "Flexible finder": any
/// combination of kind, agent, triggered-only, and a target prefix).
#[derive(Debug, Clone, Default)]
pub struct FinderFilter {
    /// Restrict to this probe kind.
    pub kind: Option<ProbeKind>,
    /// Restrict to this reporting agent.
    pub agent_id: Option<AgentId>,
    /// Restrict to triggered samples only.
    pub triggered_only: bool,
    /// Restrict to targets with this literal prefix.
    pub target_prefix: Option<String>,
    /// Earliest `created_at` (inclusive), if bounding the window.
    pub since: Option<DateTime<Utc>>,
}

/// Runs the flexible finder query over `probe_data` (§4.3), capped at
/// `limit` rows.
///
/// # Errors
///
/// Returns [`QueryError`] on a failed round-trip or malformed response body.
#[instrument(skip(client), err)]
pub async fn flexible_find(
    client: &ClickHouseClient,
    filter: &FinderFilter,
    limit: AggregationRowCap,
) -> Result<Vec<ProbeDataRow>, QueryError> {
    let mut predicates = Vec::new();
    if let Some(kind) = filter.kind {
        predicates.push(format!("type = {}", quote_string(kind_str(kind))));
    }
    if let Some(agent_id) = filter.agent_id {
        predicates.push(format!("agent_id = {}", quote_string(&agent_id.to_string())));
    }
    if filter.triggered_only {
        predicates.push(format!("triggered = {}", quote_bool(true)));
    }
    if let Some(prefix) = &filter.target_prefix {
        predicates.push(like_prefix("target", prefix));
    }
    if let Some(since) = filter.since {
        predicates.push(format!("created_at >= {}", quote_timestamp(since)));
    }

    let where_clause = if predicates.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", predicates.join(" AND "))
    };

    let sql = format!(
        "SELECT id, created_at, received_at, type, probe_id, probe_agent_id, agent_id, \
         triggered, triggered_reason, target, target_agent, payload_raw FROM probe_data \
         {where_clause} ORDER BY created_at DESC LIMIT {} FORMAT JSONEachRow",
        limit.as_usize(),
    );
    let body = client.query(&sql).await?;
    Ok(parse_jsoneachrow(&body)?)
}

fn kind_str(kind: ProbeKind) -> &'static str {
    match kind {
        ProbeKind::Ping => "PING",
        ProbeKind::Mtr => "MTR",
        ProbeKind::Rperf => "RPERF",
        ProbeKind::Speedtest => "SPEEDTEST",
        ProbeKind::NetInfo => "NETINFO",
        ProbeKind::SysInfo => "SYSINFO",
        ProbeKind::TrafficSim => "TRAFFICSIM",
        ProbeKind::Agent => "AGENT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_jsoneachrow_skips_blank_lines() {
        let body = "\n{\"id\":1,\"created_at\":\"2026-01-01T00:00:00Z\",\"received_at\":\"2026-01-01T00:00:00Z\",\"type\":\"PING\",\"probe_id\":\"00000000-0000-0000-0000-000000000001\",\"probe_agent_id\":\"00000000-0000-0000-0000-000000000002\",\"agent_id\":\"00000000-0000-0000-0000-000000000002\",\"triggered\":false,\"triggered_reason\":\"\",\"target\":\"1.1.1.1\",\"target_agent\":\"\",\"payload_raw\":\"{}\"}\n";
        let rows = parse_jsoneachrow(body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target, "1.1.1.1");
    }

    #[test]
    fn flexible_filter_with_no_predicates_omits_where_clause() {
        let filter = FinderFilter::default();
        assert!(filter.kind.is_none());
        assert!(filter.target_prefix.is_none());
    }
}
