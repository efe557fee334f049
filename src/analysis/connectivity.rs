//! On-demand connectivity read-models (§6 "connectivity matrix, network
//! map"): pure derivations over already-fetched [`ProbeMetrics`], plus the
//! gathering step that assembles them for a workspace.
//!
//! Shapes are intentionally minimal — both reports are served through the
//! same surface as per-probe/workspace analysis, built from the same
//! derived metrics rather than a separately specified schema.

use super::per_probe::{fetch_ping_metrics, fetch_trafficsim_metrics, AnalysisError};
use crate::columnar::ClickHouseClient;
use crate::domain::{AgentId, Probe, ProbeKind, ProbeMetrics, WorkspaceId};
use crate::registry::RegistryStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

const UNREACHABLE_LOSS_PCT: f64 = 50.0;

/// One agent's observed reachability to one target (§6 "connectivity
/// matrix").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityCell {
    /// Observing agent.
    pub agent_id: AgentId,
    /// Target literal string (or `agent-ref:<id>` for agent-reference
    /// targets).
    pub target: String,
    /// `false` when mean loss exceeds [`UNREACHABLE_LOSS_PCT`].
    pub reachable: bool,
    /// Mean latency over the lookback window, milliseconds.
    pub mean_latency_ms: f64,
    /// Mean packet loss percent over the lookback window.
    pub mean_loss_pct: f64,
}

/// Agent-by-target reachability grid for a workspace (§6 "connectivity
/// matrix").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityMatrix {
    /// Workspace this matrix covers.
    pub workspace_id: WorkspaceId,
    /// When this matrix was computed.
    pub generated_at: DateTime<Utc>,
    /// One cell per (agent, target) pair observed in the window.
    pub cells: Vec<ConnectivityCell>,
}

/// A node in the [`NetworkMap`]: either an agent or a resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkNodeKind {
    /// A monitoring agent.
    Agent,
    /// A measured target (literal address or another agent).
    Target,
}

/// One node in the [`NetworkMap`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Stable node id: the agent id, or `target:<literal>`.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Node kind.
    pub kind: NetworkNodeKind,
}

/// One edge in the [`NetworkMap`], an agent's measurement toward a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEdge {
    /// Source node id (always an agent).
    pub from: String,
    /// Destination node id (always a target).
    pub to: String,
    /// Mean latency over the lookback window, milliseconds.
    pub mean_latency_ms: f64,
    /// Mean packet loss percent over the lookback window.
    pub mean_loss_pct: f64,
    /// `false` when mean loss exceeds [`UNREACHABLE_LOSS_PCT`].
    pub healthy: bool,
}

/// Node/edge graph of agents and the targets they measure (§6 "network
/// map").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMap {
    /// Workspace this map covers.
    pub workspace_id: WorkspaceId,
    /// When this map was computed.
    pub generated_at: DateTime<Utc>,
    /// Agent and target nodes.
    pub nodes: Vec<NetworkNode>,
    /// Agent-to-target edges.
    pub edges: Vec<NetworkEdge>,
}

fn target_literal(probe: &Probe) -> String {
    probe
        .targets
        .first()
        .and_then(|t| t.literal_str())
        .map_or_else(|| format!("agent-ref:{}", probe.agent_id), ToString::to_string)
}

async fn probe_metrics(
    client: &ClickHouseClient,
    probe: &Probe,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Option<ProbeMetrics>, AnalysisError> {
    let metrics = match probe.kind {
        ProbeKind::Ping => fetch_ping_metrics(client, probe.id, since, until).await?,
        ProbeKind::TrafficSim => fetch_trafficsim_metrics(client, probe.id, since, until).await?,
        ProbeKind::Agent => {
            let ping = fetch_ping_metrics(client, probe.id, since, until).await?;
            let trafficsim = fetch_trafficsim_metrics(client, probe.id, since, until).await?;
            ping.blend_with_trafficsim(&trafficsim)
        }
        _ => return Ok(None),
    };
    if metrics.sample_count == 0 {
        return Ok(None);
    }
    Ok(Some(metrics))
}

async fn gather_cells(
    client: &ClickHouseClient,
    store: &dyn RegistryStore,
    workspace_id: WorkspaceId,
    window: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<Vec<ConnectivityCell>, AnalysisError> {
    let agents = store.list_agents_for_workspace(workspace_id).await?;
    let window_duration = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::minutes(60));
    let since = now - window_duration;

    let mut cells = Vec::new();
    for agent in agents {
        let probes = store.list_probes_for_agent(agent.id).await?;
        for probe in &probes {
            if let Some(metrics) = probe_metrics(client, probe, since, now).await? {
                cells.push(ConnectivityCell {
                    agent_id: agent.id,
                    target: target_literal(probe),
                    reachable: metrics.mean_loss_pct < UNREACHABLE_LOSS_PCT,
                    mean_latency_ms: metrics.mean_latency_ms,
                    mean_loss_pct: metrics.mean_loss_pct,
                });
            }
        }
    }
    Ok(cells)
}

/// Builds the connectivity matrix for a workspace over the trailing
/// `window` (§6 "connectivity matrix").
///
/// # Errors
///
/// Returns [`AnalysisError`] if a registry lookup or columnar read fails.
pub async fn connectivity_matrix(
    client: &ClickHouseClient,
    store: &dyn RegistryStore,
    workspace_id: WorkspaceId,
    window: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<ConnectivityMatrix, AnalysisError> {
    let cells = gather_cells(client, store, workspace_id, window, now).await?;
    Ok(ConnectivityMatrix {
        workspace_id,
        generated_at: now,
        cells,
    })
}

/// Builds the network map for a workspace over the trailing `window` (§6
/// "network map"), derived from the same cells as [`connectivity_matrix`].
///
/// # Errors
///
/// Returns [`AnalysisError`] if a registry lookup or columnar read fails.
pub async fn network_map(
    client: &ClickHouseClient,
    store: &dyn RegistryStore,
    workspace_id: WorkspaceId,
    window: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<NetworkMap, AnalysisError> {
    let cells = gather_cells(client, store, workspace_id, window, now).await?;

    let mut nodes = std::collections::HashMap::new();
    let mut edges = Vec::new();
    for cell in &cells {
        let agent_node_id = cell.agent_id.to_string();
        nodes.entry(agent_node_id.clone()).or_insert_with(|| NetworkNode {
            id: agent_node_id.clone(),
            label: agent_node_id.clone(),
            kind: NetworkNodeKind::Agent,
        });
        let target_node_id = format!("target:{}", cell.target);
        nodes.entry(target_node_id.clone()).or_insert_with(|| NetworkNode {
            id: target_node_id.clone(),
            label: cell.target.clone(),
            kind: NetworkNodeKind::Target,
        });
        edges.push(NetworkEdge {
            from: agent_node_id,
            to: target_node_id,
            mean_latency_ms: cell.mean_latency_ms,
            mean_loss_pct: cell.mean_loss_pct,
            healthy: cell.reachable,
        });
    }

    Ok(NetworkMap {
        workspace_id,
        generated_at: now,
        nodes: nodes.into_values().collect(),
        edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_threshold_flags_high_loss() {
        let cell = ConnectivityCell {
            agent_id: AgentId::generate(),
            target: "1.1.1.1".to_string(),
            reachable: 60.0 < UNREACHABLE_LOSS_PCT,
            mean_latency_ms: 10.0,
            mean_loss_pct: 60.0,
        };
        assert!(!cell.reachable);
    }
}
