//! Analysis snapshot persistence (§4.4 "Snapshot persistence", §6
//! `analysis_snapshots`): one append-only row per completed analysis cycle,
//! plus the history read used by the on-demand query surface.

use super::client::{ClickHouseClient, ClickHouseError};
use super::quoting::{quote_int, quote_string, quote_timestamp};
use crate::domain::{AnalysisSnapshot, Grade, Status, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

/// Errors from snapshot persistence or history reads.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The HTTP round-trip to the columnar store failed.
    #[error(transparent)]
    Store(#[from] ClickHouseError),
    /// A row in the response body did not decode as JSON.
    #[error("malformed snapshot row: {0}")]
    Decode(#[from] serde_json::Error),
}

fn grade_str(grade: Grade) -> &'static str {
    match grade {
        Grade::Excellent => "EXCELLENT",
        Grade::Good => "GOOD",
        Grade::Fair => "FAIR",
        Grade::Poor => "POOR",
        Grade::Critical => "CRITICAL",
    }
}

fn parse_grade(s: &str) -> Grade {
    match s {
        "EXCELLENT" => Grade::Excellent,
        "GOOD" => Grade::Good,
        "FAIR" => Grade::Fair,
        "POOR" => Grade::Poor,
        _ => Grade::Critical,
    }
}

fn status_str(status: Status) -> &'static str {
    match status {
        Status::Unknown => "unknown",
        Status::Outage => "outage",
        Status::Degraded => "degraded",
        Status::Healthy => "healthy",
    }
}

fn parse_status(s: &str) -> Status {
    match s {
        "outage" => Status::Outage,
        "degraded" => Status::Degraded,
        "healthy" => Status::Healthy,
        _ => Status::Unknown,
    }
}

/// Inserts one completed analysis cycle's snapshot row (§4.4 "Snapshot
/// persistence": one row per (workspace, cycle)).
///
/// # Errors
///
/// Returns [`SnapshotError`] if the insert round-trip fails.
#[instrument(skip(client, snapshot), fields(workspace_id = %snapshot.workspace_id), err)]
pub async fn insert_snapshot(client: &ClickHouseClient, snapshot: &AnalysisSnapshot) -> Result<(), SnapshotError> {
    let sql = format!(
        "INSERT INTO analysis_snapshots (workspace_id, generated_at, overall_health, latency_score, \
         packet_loss_score, route_stability, mos_score, grade, status, status_message, incident_count, \
         total_agents, online_agents, total_probes, incidents_json, agents_json, llm_summary) \
         VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
        quote_string(&snapshot.workspace_id.to_string()),
        quote_timestamp(snapshot.generated_at),
        snapshot.overall_health,
        snapshot.latency_score,
        snapshot.packet_loss_score,
        snapshot.route_stability,
        snapshot.mos_score,
        quote_string(grade_str(snapshot.grade)),
        quote_string(status_str(snapshot.status)),
        quote_string(&snapshot.status_message),
        quote_int(i64::from(snapshot.incident_count)),
        quote_int(i64::from(snapshot.total_agents)),
        quote_int(i64::from(snapshot.online_agents)),
        quote_int(i64::from(snapshot.total_probes)),
        quote_string(&snapshot.incidents_json),
        quote_string(&snapshot.agents_json),
        quote_string(&snapshot.llm_summary),
    );
    client.execute(&sql).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SnapshotRow {
    workspace_id: String,
    generated_at: DateTime<Utc>,
    overall_health: f64,
    latency_score: f64,
    packet_loss_score: f64,
    route_stability: f64,
    mos_score: f64,
    grade: String,
    status: String,
    status_message: String,
    incident_count: u32,
    total_agents: u32,
    online_agents: u32,
    total_probes: u32,
    incidents_json: String,
    agents_json: String,
    llm_summary: String,
}

fn parse_jsoneachrow(body: &str) -> Result<Vec<SnapshotRow>, SnapshotError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(SnapshotError::from))
        .collect()
}

/// Returns the most recent `limit` snapshots for `workspace_id`, newest
/// first (§6 "snapshot history" on-demand query).
///
/// # Errors
///
/// Returns [`SnapshotError`] on a failed round-trip or malformed response.
#[instrument(skip(client), err)]
pub async fn fetch_snapshot_history(
    client: &ClickHouseClient,
    workspace_id: WorkspaceId,
    limit: u32,
) -> Result<Vec<AnalysisSnapshot>, SnapshotError> {
    let sql = format!(
        "SELECT workspace_id, generated_at, overall_health, latency_score, packet_loss_score, \
         route_stability, mos_score, grade, status, status_message, incident_count, total_agents, \
         online_agents, total_probes, incidents_json, agents_json, llm_summary FROM analysis_snapshots \
         WHERE workspace_id = {} ORDER BY generated_at DESC LIMIT {} FORMAT JSONEachRow",
        quote_string(&workspace_id.to_string()),
        limit,
    );
    let body = client.query(&sql).await?;
    let rows = parse_jsoneachrow(&body)?;
    Ok(rows
        .into_iter()
        .filter_map(|r| {
            let workspace_id = r.workspace_id.parse::<uuid::Uuid>().ok()?;
            Some(AnalysisSnapshot {
                workspace_id: WorkspaceId::from(workspace_id),
                generated_at: r.generated_at,
                overall_health: r.overall_health,
                latency_score: r.latency_score,
                packet_loss_score: r.packet_loss_score,
                route_stability: r.route_stability,
                mos_score: r.mos_score,
                grade: parse_grade(&r.grade),
                status: parse_status(&r.status),
                status_message: r.status_message,
                incident_count: r.incident_count,
                total_agents: r.total_agents,
                online_agents: r.online_agents,
                total_probes: r.total_probes,
                incidents_json: r.incidents_json,
                agents_json: r.agents_json,
                llm_summary: r.llm_summary,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_str_round_trips() {
        assert_eq!(parse_grade(grade_str(Grade::Fair)), Grade::Fair);
    }

    #[test]
    fn status_str_round_trips() {
        assert_eq!(parse_status(status_str(Status::Degraded)), Status::Degraded);
    }
}
