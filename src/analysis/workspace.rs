//! Workspace-level analysis (§4.4 "Workspace analysis", "Incident
//! detection", "Baseline (temporal) change detection", "Host capacity",
//! "NetInfo change detection", "Status summary").
//!
//! Per-agent and per-probe scoring delegates to [`super::per_probe`]; this
//! module is the orchestration layer that fans out across a workspace's
//! agents, correlates the results, and derives incidents.

use super::per_probe::{self, agent_rollup, fetch_ping_metrics, fetch_trafficsim_metrics, AnalysisError};
use super::scoring::health_vector;
use crate::columnar::query;
use crate::columnar::ClickHouseClient;
use crate::domain::{
    Agent, AgentAnalysis, AgentId, FreshnessWindowSecs, Incident, IncidentScope, Probe, ProbeId,
    ProbeKind, ProbeMetrics, Severity, Status, StatusSummary, WorkspaceAnalysis, WorkspaceId,
};
use crate::registry::RegistryStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{instrument, warn};

const SHARED_TARGET_LOSS_PCT: f64 = 1.0;
const SHARED_TARGET_LATENCY_MS: f64 = 100.0;
const SHARED_TARGET_CRITICAL_LOSS_PCT: f64 = 5.0;
const SHARED_TARGET_CRITICAL_LATENCY_MS: f64 = 200.0;
const SINGLE_AGENT_LOSS_PCT: f64 = 3.0;
const SINGLE_AGENT_LATENCY_MS: f64 = 200.0;

const BASELINE_MIN_LATENCY_MS: f64 = 5.0;
const BASELINE_WARNING_MULTIPLIER: f64 = 2.0;
const BASELINE_CRITICAL_MULTIPLIER: f64 = 3.0;
const BASELINE_MAX_LOSS_PCT: f64 = 0.5;
const BASELINE_CURRENT_LOSS_PCT: f64 = 1.0;
const BASELINE_WINDOW_DAYS: i64 = 7;

const HOST_MEMORY_WARNING_PCT: f64 = 90.0;
const HOST_MEMORY_CRITICAL_PCT: f64 = 95.0;
const HOST_CPU_WARNING_PCT: f64 = 85.0;
const HOST_CPU_CRITICAL_PCT: f64 = 95.0;

const OFFLINE_PENALTY: f64 = 20.0;

/// Errors from the optional status summariser plug-in (§4.4 "Status
/// summary", §9(c)): any failure falls back to the rule-based message.
#[derive(Error, Debug)]
#[error("summariser failed: {0}")]
pub struct SummariserError(pub String);

/// Optional natural-language enrichment for the rule-based status message
/// (§4.4 "when an optional summariser is installed and available"). Called
/// at most once per analysis cycle; its output is stored verbatim in
/// `AnalysisSnapshot::llm_summary` so re-reading the snapshot never
/// re-invokes it (§9(c)).
#[async_trait]
pub trait StatusSummariser: Send + Sync {
    /// Produces an enriched status message for a completed analysis.
    async fn summarize(&self, analysis: &WorkspaceAnalysis) -> Result<String, SummariserError>;
}

fn sanitize_target(target: &str) -> String {
    target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The literal string a probe is measured against, for shared-target
/// correlation keying (§4.4 "keyed by `<agent-id>:<target>`"). Probes with
/// more than one target are approximated by their first target.
fn target_literal(probe: &Probe) -> String {
    probe
        .targets
        .first()
        .and_then(|t| t.literal_str())
        .map_or_else(|| format!("agent-ref:{}", probe.agent_id), ToString::to_string)
}

struct TargetObservation {
    agent_id: AgentId,
    metrics: ProbeMetrics,
}

async fn probe_metrics(
    client: &ClickHouseClient,
    probe: &Probe,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<ProbeMetrics, AnalysisError> {
    match probe.kind {
        ProbeKind::TrafficSim => fetch_trafficsim_metrics(client, probe.id, since, until).await,
        ProbeKind::Agent => {
            let ping = fetch_ping_metrics(client, probe.id, since, until).await?;
            let trafficsim = fetch_trafficsim_metrics(client, probe.id, since, until).await?;
            Ok(ping.blend_with_trafficsim(&trafficsim))
        }
        _ => fetch_ping_metrics(client, probe.id, since, until).await,
    }
}

fn suggested_cause(mean_loss_pct: f64, mean_latency_ms: f64) -> (Option<String>, Vec<String>) {
    if mean_loss_pct > SHARED_TARGET_CRITICAL_LOSS_PCT {
        (
            Some("Packet loss along a shared upstream path segment".to_string()),
            vec![
                "Investigate the shared network path between the affected agents.".to_string(),
                "Check for congestion or hardware faults at the common upstream hop.".to_string(),
                "Review MTR traceroutes from affected agents".to_string(),
            ],
        )
    } else if mean_latency_ms > SHARED_TARGET_CRITICAL_LATENCY_MS {
        (
            Some("Latency increase on a shared path segment".to_string()),
            vec!["Compare MTR traces from affected agents for a common slow hop.".to_string()],
        )
    } else {
        (
            Some("Degraded reachability to a shared target".to_string()),
            vec!["Monitor the target for continued degradation.".to_string()],
        )
    }
}

/// Shared-target correlation (§4.4 "Incident detection", class 1).
fn shared_target_incidents(groups: &HashMap<String, Vec<TargetObservation>>, now: DateTime<Utc>) -> Vec<Incident> {
    let mut incidents = Vec::new();
    for (target, observations) in groups {
        let qualifying: Vec<&TargetObservation> = observations
            .iter()
            .filter(|o| o.metrics.mean_loss_pct > SHARED_TARGET_LOSS_PCT || o.metrics.mean_latency_ms > SHARED_TARGET_LATENCY_MS)
            .collect();
        if qualifying.is_empty() {
            continue;
        }
        let distinct_agents: std::collections::HashSet<AgentId> = qualifying.iter().map(|o| o.agent_id).collect();
        let mean_loss = qualifying.iter().map(|o| o.metrics.mean_loss_pct).sum::<f64>() / qualifying.len() as f64;
        let mean_latency = qualifying.iter().map(|o| o.metrics.mean_latency_ms).sum::<f64>() / qualifying.len() as f64;
        let (suggested_cause, recommendations) = suggested_cause(mean_loss, mean_latency);

        if distinct_agents.len() >= 2 {
            let severity = if mean_loss > SHARED_TARGET_CRITICAL_LOSS_PCT || mean_latency > SHARED_TARGET_CRITICAL_LATENCY_MS {
                Severity::Critical
            } else {
                Severity::Warning
            };
            incidents.push(Incident {
                id: format!("shared_target_{}", sanitize_target(target)),
                scope: IncidentScope::Infrastructure,
                severity,
                title: format!("Multiple agents report degraded reachability to {target}"),
                affected_agents: distinct_agents.into_iter().collect(),
                suggested_cause,
                recommendations,
                detected_at: now,
            });
        } else if let Some(single) = qualifying.first() {
            if single.metrics.mean_loss_pct > SINGLE_AGENT_LOSS_PCT || single.metrics.mean_latency_ms > SINGLE_AGENT_LATENCY_MS {
                incidents.push(Incident {
                    id: format!("shared_target_{}_{}", sanitize_target(target), single.agent_id),
                    scope: IncidentScope::AgentSpecific,
                    severity: Severity::Warning,
                    title: format!("Degraded reachability to {target}"),
                    affected_agents: vec![single.agent_id],
                    suggested_cause,
                    recommendations,
                    detected_at: now,
                });
            }
        }
    }
    incidents
}

/// Agent-level incidents (§4.4 "Incident detection", class 2).
fn agent_level_incidents(
    agent: &Agent,
    online: bool,
    rollup: &AgentAnalysis,
    probes_by_id: &HashMap<ProbeId, Probe>,
    now: DateTime<Utc>,
) -> Vec<Incident> {
    let mut incidents = Vec::new();
    if !online {
        incidents.push(Incident {
            id: format!("agent_offline_{}", agent.id),
            scope: IncidentScope::AgentSpecific,
            severity: Severity::Critical,
            title: format!("Agent {} is offline", agent.name),
            affected_agents: vec![agent.id],
            suggested_cause: Some("Agent has not reported within the freshness window".to_string()),
            recommendations: vec!["Check agent connectivity and process health.".to_string()],
            detected_at: now,
        });
        return incidents;
    }

    let grade = rollup.health.grade();
    if grade.is_degraded() {
        let severity = if grade == crate::domain::Grade::Critical {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let worst_targets: Vec<String> = rollup
            .worst_probes
            .iter()
            .filter_map(|id| probes_by_id.get(id))
            .map(|p| target_literal(p))
            .collect();
        incidents.push(Incident {
            id: format!("agent_degraded_{}", agent.id),
            scope: IncidentScope::AgentSpecific,
            severity,
            title: format!("Agent {} health is degraded", agent.name),
            affected_agents: vec![agent.id],
            suggested_cause: Some("Sustained degraded health across the agent's probes".to_string()),
            recommendations: vec![format!("Worst targets: {}", worst_targets.join(", "))],
            detected_at: now,
        });
    }
    incidents
}

/// Infrastructure-wide incident (§4.4 "Incident detection", class 3).
fn infrastructure_wide_incident(
    agents: &[Agent],
    online_flags: &HashMap<AgentId, bool>,
    rollups: &HashMap<AgentId, &AgentAnalysis>,
    now: DateTime<Utc>,
) -> Option<Incident> {
    if agents.is_empty() {
        return None;
    }
    let affected: Vec<AgentId> = agents
        .iter()
        .filter(|a| {
            let online = online_flags.get(&a.id).copied().unwrap_or(false);
            !online || rollups.get(&a.id).is_some_and(|r| r.health.grade().is_degraded())
        })
        .map(|a| a.id)
        .collect();

    if affected.len() * 2 > agents.len() {
        Some(Incident {
            id: "infrastructure_degraded".to_string(),
            scope: IncidentScope::Infrastructure,
            severity: Severity::Critical,
            title: "More than half of agents in this workspace are offline or degraded".to_string(),
            affected_agents: affected,
            suggested_cause: Some("Widespread connectivity or infrastructure failure".to_string()),
            recommendations: vec!["Check upstream connectivity shared by most agents.".to_string()],
            detected_at: now,
        })
    } else {
        None
    }
}

/// Baseline (temporal) regression detection (§4.4 "Baseline (temporal)
/// change detection").
fn baseline_incidents(
    agent_id: AgentId,
    probe_id: ProbeId,
    current: &ProbeMetrics,
    baseline: &ProbeMetrics,
    now: DateTime<Utc>,
) -> Vec<Incident> {
    let mut incidents = Vec::new();
    if baseline.mean_latency_ms > BASELINE_MIN_LATENCY_MS {
        let ratio = current.mean_latency_ms / baseline.mean_latency_ms;
        if ratio > BASELINE_CRITICAL_MULTIPLIER {
            incidents.push(latency_regression_incident(agent_id, probe_id, Severity::Critical, now));
        } else if ratio > BASELINE_WARNING_MULTIPLIER {
            incidents.push(latency_regression_incident(agent_id, probe_id, Severity::Warning, now));
        }
    }
    if baseline.mean_loss_pct < BASELINE_MAX_LOSS_PCT && current.mean_loss_pct > BASELINE_CURRENT_LOSS_PCT {
        incidents.push(Incident {
            id: format!("loss_regression_{agent_id}_{probe_id}"),
            scope: IncidentScope::AgentSpecific,
            severity: Severity::Warning,
            title: "Packet loss has regressed against its 7-day baseline".to_string(),
            affected_agents: vec![agent_id],
            suggested_cause: Some("Loss has risen well above its historical baseline".to_string()),
            recommendations: vec!["Compare current MTR traces against the historical route.".to_string()],
            detected_at: now,
        });
    }
    incidents
}

fn latency_regression_incident(agent_id: AgentId, probe_id: ProbeId, severity: Severity, now: DateTime<Utc>) -> Incident {
    Incident {
        id: format!("latency_regression_{agent_id}_{probe_id}"),
        scope: IncidentScope::AgentSpecific,
        severity,
        title: "Latency has regressed against its 7-day baseline".to_string(),
        affected_agents: vec![agent_id],
        suggested_cause: Some("Latency has risen well above its historical baseline".to_string()),
        recommendations: vec!["Check for new route hops or upstream congestion.".to_string()],
        detected_at: now,
    }
}

/// Host capacity incidents from `SYSINFO` (§4.4 "Host capacity").
fn host_capacity_incident(agent: &Agent, cpu_pct: f64, mem_pct: f64, now: DateTime<Utc>) -> Option<Incident> {
    let severity = if mem_pct > HOST_MEMORY_CRITICAL_PCT || cpu_pct > HOST_CPU_CRITICAL_PCT {
        Some(Severity::Critical)
    } else if mem_pct > HOST_MEMORY_WARNING_PCT || cpu_pct > HOST_CPU_WARNING_PCT {
        Some(Severity::Warning)
    } else {
        None
    };
    severity.map(|severity| Incident {
        id: format!("host_capacity_{}", agent.id),
        scope: IncidentScope::AgentSpecific,
        severity,
        title: format!("Agent {} is under host resource pressure", agent.name),
        affected_agents: vec![agent.id],
        suggested_cause: Some(format!("CPU {cpu_pct:.1}%, memory {mem_pct:.1}%")),
        recommendations: vec!["Check for runaway processes or insufficient host capacity.".to_string()],
        detected_at: now,
    })
}

/// `NetInfo` change incidents (§4.4 "NetInfo change detection").
fn netinfo_change_incidents(
    agent: &Agent,
    previous: &crate::domain::NetInfoPayload,
    latest: &crate::domain::NetInfoPayload,
    now: DateTime<Utc>,
) -> Vec<Incident> {
    let mut incidents = Vec::new();
    if previous.public_address != latest.public_address && !latest.public_address.is_empty() {
        incidents.push(Incident {
            id: format!("ip_change_{}", agent.id),
            scope: IncidentScope::AgentSpecific,
            severity: Severity::Info,
            title: format!("Agent {} public IP changed", agent.name),
            affected_agents: vec![agent.id],
            suggested_cause: Some(format!(
                "Public address changed from {} to {}",
                previous.public_address, latest.public_address
            )),
            recommendations: vec![],
            detected_at: now,
        });
    }
    if let (Some(prev_isp), Some(new_isp)) = (&previous.isp, &latest.isp) {
        if prev_isp != new_isp && !prev_isp.is_empty() && !new_isp.is_empty() {
            incidents.push(Incident {
                id: format!("isp_change_{}", agent.id),
                scope: IncidentScope::AgentSpecific,
                severity: Severity::Warning,
                title: format!("Agent {} ISP changed", agent.name),
                affected_agents: vec![agent.id],
                suggested_cause: Some(format!("ISP changed from {prev_isp} to {new_isp}")),
                recommendations: vec!["Confirm this was an expected network change.".to_string()],
                detected_at: now,
            });
        }
    }
    incidents
}

fn status_from_counts(total_agents: u32, online_agents: u32, incidents: &[Incident]) -> Status {
    if total_agents == 0 {
        Status::Unknown
    } else if online_agents == 0 {
        Status::Outage
    } else if online_agents < total_agents || incidents.iter().any(|i| i.severity == Severity::Critical) {
        Status::Degraded
    } else {
        Status::Healthy
    }
}

fn rule_based_message(status: Status, total_agents: u32, online_agents: u32, incident_count: usize) -> String {
    match status {
        Status::Unknown => "No agents are registered in this workspace.".to_string(),
        Status::Outage => format!("All {total_agents} agents in this workspace are offline."),
        Status::Degraded => format!(
            "{online_agents} of {total_agents} agents are online; {incident_count} incident(s) detected."
        ),
        Status::Healthy => format!("All systems are operating normally across {total_agents} agents."),
    }
}

/// Runs a full workspace analysis cycle (§4.4 "Workspace analysis",
/// "Incident detection", baseline/host-capacity/NetInfo change detection,
/// and status summary derivation).
///
/// # Errors
///
/// Returns [`AnalysisError`] if a registry lookup, columnar read, or
/// payload decode fails outright; per-agent failures are not swallowed here
/// (the caller's scheduler is responsible for isolating one workspace's
/// failure from the rest of the cycle, per §7 "Analysis errors for one
/// workspace never abort the whole cycle").
#[instrument(skip(client, store, summariser), fields(workspace_id = %workspace_id), err)]
pub async fn analyze_workspace(
    client: &ClickHouseClient,
    store: &dyn RegistryStore,
    workspace_id: WorkspaceId,
    now: DateTime<Utc>,
    freshness: FreshnessWindowSecs,
    window: std::time::Duration,
    summariser: Option<&dyn StatusSummariser>,
) -> Result<WorkspaceAnalysis, AnalysisError> {
    let agents = store.list_agents_for_workspace(workspace_id).await?;
    let total_agents = u32::try_from(agents.len()).unwrap_or(u32::MAX);

    if agents.is_empty() {
        return Ok(WorkspaceAnalysis {
            workspace_id,
            generated_at: now,
            health: crate::domain::HealthVector {
                latency_score: 0.0,
                loss_score: 0.0,
                route_stability: 0.0,
                mos: 1.0,
                overall: 0.0,
            },
            agents: Vec::new(),
            incidents: Vec::new(),
            status: StatusSummary {
                status: Status::Unknown,
                message: rule_based_message(Status::Unknown, 0, 0, 0),
            },
            total_probes: 0,
            total_agents: 0,
            online_agents: 0,
        });
    }

    let window_duration = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::minutes(60));
    let window_start = now - window_duration;
    let baseline_start = now - ChronoDuration::days(BASELINE_WINDOW_DAYS);

    let mut agent_rollups: Vec<AgentAnalysis> = Vec::new();
    let mut online_flags: HashMap<AgentId, bool> = HashMap::new();
    let mut target_groups: HashMap<String, Vec<TargetObservation>> = HashMap::new();
    let mut probes_by_id: HashMap<ProbeId, Probe> = HashMap::new();
    let mut incidents: Vec<Incident> = Vec::new();
    let mut total_probes: u32 = 0;
    let mut online_agents: u32 = 0;

    for agent in &agents {
        let online = agent.is_online(now, freshness);
        online_flags.insert(agent.id, online);
        if online {
            online_agents += 1;
        }

        let probes = store.list_probes_for_agent(agent.id).await?;
        let mut scored: Vec<(ProbeId, crate::domain::HealthVector)> = Vec::new();

        for probe in probes.iter().filter(|p| p.kind != ProbeKind::NetInfo) {
            total_probes += 1;

            match probe.kind {
                ProbeKind::Ping | ProbeKind::TrafficSim | ProbeKind::Agent => {
                    let metrics = probe_metrics(client, probe, window_start, now).await?;
                    let health = health_vector(&metrics, 100.0);
                    scored.push((probe.id, health));

                    target_groups
                        .entry(target_literal(probe))
                        .or_default()
                        .push(TargetObservation { agent_id: agent.id, metrics });

                    if probe.kind != ProbeKind::Agent {
                        let baseline = probe_metrics(client, probe, baseline_start, window_start).await?;
                        incidents.extend(baseline_incidents(agent.id, probe.id, &metrics, &baseline, now));
                    }
                }
                ProbeKind::Mtr => {
                    if let Some(mtr) = per_probe::fetch_mtr_analysis(client, probe.id, window_start, now).await? {
                        let metrics = ProbeMetrics {
                            mean_latency_ms: mtr.mean_end_hop_latency_ms,
                            p95_latency_ms: mtr.mean_end_hop_latency_ms,
                            mean_loss_pct: mtr.mean_end_hop_loss_pct,
                            mean_jitter_ms: 0.0,
                            sample_count: 1,
                        };
                        let health = health_vector(&metrics, mtr.route_stability_pct);
                        scored.push((probe.id, health));
                        target_groups
                            .entry(target_literal(probe))
                            .or_default()
                            .push(TargetObservation { agent_id: agent.id, metrics });
                    }
                }
                ProbeKind::SysInfo => {
                    if let Ok(Some(row)) = query::latest_by_kind_agent(client, ProbeKind::SysInfo, agent.id).await {
                        if let Ok(payload) = serde_json::from_str::<crate::domain::SysInfoPayload>(&row.payload_raw) {
                            if let Some(incident) = host_capacity_incident(agent, payload.cpu_percent(), payload.memory_percent(), now) {
                                incidents.push(incident);
                            }
                        }
                    }
                }
                ProbeKind::Rperf | ProbeKind::Speedtest | ProbeKind::NetInfo => {}
            }

            probes_by_id.insert(probe.id, probe.clone());
        }

        if let Ok(netinfo_rows) = query::latest_n_by_kind_agent(client, ProbeKind::NetInfo, agent.id, 2).await {
            if let [latest_row, previous_row] = netinfo_rows.as_slice() {
                if let (Ok(latest), Ok(previous)) = (
                    serde_json::from_str::<crate::domain::NetInfoPayload>(&latest_row.payload_raw),
                    serde_json::from_str::<crate::domain::NetInfoPayload>(&previous_row.payload_raw),
                ) {
                    incidents.extend(netinfo_change_incidents(agent, &previous, &latest, now));
                }
            }
        }

        let rollup = agent_rollup(agent.id, online, &scored, OFFLINE_PENALTY);
        agent_rollups.push(rollup);
    }

    let n_agents = agent_rollups.len().max(1) as f64;
    let overall_mean = agent_rollups.iter().map(|a| a.health.overall).sum::<f64>() / n_agents;
    let latency_mean = agent_rollups.iter().map(|a| a.health.latency_score).sum::<f64>() / n_agents;
    let loss_mean = agent_rollups.iter().map(|a| a.health.loss_score).sum::<f64>() / n_agents;
    let route_mean = agent_rollups.iter().map(|a| a.health.route_stability).sum::<f64>() / n_agents;
    let mos_mean = agent_rollups.iter().map(|a| a.health.mos).sum::<f64>() / n_agents;
    let workspace_health = crate::domain::HealthVector {
        latency_score: latency_mean,
        loss_score: loss_mean,
        route_stability: route_mean,
        mos: mos_mean,
        overall: overall_mean,
    };

    incidents.extend(shared_target_incidents(&target_groups, now));
    for (agent, rollup) in agents.iter().zip(&agent_rollups) {
        let online = online_flags.get(&agent.id).copied().unwrap_or(false);
        incidents.extend(agent_level_incidents(agent, online, rollup, &probes_by_id, now));
    }
    let rollups_by_id: HashMap<AgentId, &AgentAnalysis> = agents.iter().zip(&agent_rollups).map(|(a, r)| (a.id, r)).collect();
    if let Some(incident) = infrastructure_wide_incident(&agents, &online_flags, &rollups_by_id, now) {
        incidents.push(incident);
    }

    let mut seen_ids = std::collections::HashSet::new();
    incidents.retain(|i| seen_ids.insert(i.id.clone()));

    let status = status_from_counts(total_agents, online_agents, &incidents);
    let mut message = rule_based_message(status, total_agents, online_agents, incidents.len());

    let mut analysis = WorkspaceAnalysis {
        workspace_id,
        generated_at: now,
        health: workspace_health,
        agents: agent_rollups,
        incidents,
        status: StatusSummary { status, message: message.clone() },
        total_probes,
        total_agents,
        online_agents,
    };

    if let Some(summariser) = summariser {
        match summariser.summarize(&analysis).await {
            Ok(enriched) => message = enriched,
            Err(e) => warn!(error = %e, "status summariser failed, keeping rule-based message"),
        }
        analysis.status.message = message;
    }

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_target_replaces_dots_with_underscores() {
        assert_eq!(sanitize_target("8.8.8.8"), "8_8_8_8");
    }

    #[test]
    fn status_from_counts_prefers_outage_when_all_offline() {
        assert_eq!(status_from_counts(3, 0, &[]), Status::Outage);
    }

    #[test]
    fn status_from_counts_is_unknown_with_no_agents() {
        assert_eq!(status_from_counts(0, 0, &[]), Status::Unknown);
    }

    #[test]
    fn status_from_counts_is_healthy_when_all_online_and_no_incidents() {
        assert_eq!(status_from_counts(3, 3, &[]), Status::Healthy);
    }
}
