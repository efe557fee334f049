//! The Alert Bridge: rule evaluation on arriving samples and on completed
//! analysis cycles (§4.5 "Rule evaluation on sample", "Rule evaluation on
//! analysis").

use super::store::AlertStore;
use super::webhook::{dispatch_webhook, WebhookPayload};
use super::AlertError;
use crate::domain::{
    Alert, AlertRule, AlertStatus, AgentId, Comparison, Metric, MtrPayload, PingPayload, ProbeId,
    ProbeKind, Severity, TrafficSimPayload, WebhookTimeoutMs, WorkspaceAnalysis, WorkspaceId,
};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Enriched context the Intake forwards for one fanned-out sample (§4.2
/// "Kinds that fan out to alerts").
#[derive(Debug, Clone)]
pub struct SampleContext {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Probe this sample belongs to.
    pub probe_id: ProbeId,
    /// Reporting agent.
    pub agent_id: AgentId,
    /// Probe kind.
    pub kind: ProbeKind,
    /// Raw JSON payload, as stored.
    pub raw_payload: String,
}

fn sample_rule_applies(rule: &AlertRule, ctx: &SampleContext) -> bool {
    rule.metric.is_sample_metric()
        && rule.probe_id.is_none_or(|p| p == ctx.probe_id)
        && rule.agent_id.is_none_or(|a| a == ctx.agent_id)
}

/// Extracts the single numeric quantity `metric` derives from one kind's
/// raw payload, or `None` when that kind has no derivable value for it
/// (e.g. jitter from a `TRAFFICSIM` round, §4.5 "matches the sample's
/// derivable quantity").
fn derive_sample_metric_value(kind: ProbeKind, raw_payload: &str, metric: Metric) -> Option<f64> {
    match (kind, metric) {
        (ProbeKind::Ping, Metric::PacketLoss) => {
            serde_json::from_str::<PingPayload>(raw_payload).ok().map(|p| p.loss_pct)
        }
        (ProbeKind::Ping, Metric::Latency) => serde_json::from_str::<PingPayload>(raw_payload)
            .ok()
            .map(|p| p.avg_rtt_ns as f64 / 1_000_000.0),
        (ProbeKind::Ping, Metric::Jitter) => serde_json::from_str::<PingPayload>(raw_payload)
            .ok()
            .map(|p| p.jitter_ns as f64 / 1_000_000.0),
        (ProbeKind::TrafficSim, Metric::PacketLoss) => {
            serde_json::from_str::<TrafficSimPayload>(raw_payload).ok().map(|p| p.loss_pct())
        }
        (ProbeKind::TrafficSim, Metric::Latency) => serde_json::from_str::<TrafficSimPayload>(raw_payload)
            .ok()
            .map(|p| p.avg_rtt_ns as f64 / 1_000_000.0),
        (ProbeKind::Mtr, Metric::PacketLoss) => {
            serde_json::from_str::<MtrPayload>(raw_payload).ok().map(|p| p.end_to_end_loss_pct())
        }
        (ProbeKind::Mtr, Metric::Latency) => serde_json::from_str::<MtrPayload>(raw_payload)
            .ok()
            .and_then(|p| p.last_responding_hop().map(|h| h.avg_rtt_ns as f64 / 1_000_000.0)),
        _ => None,
    }
}

fn metric_name(metric: Metric) -> &'static str {
    match metric {
        Metric::PacketLoss => "packet_loss",
        Metric::Latency => "latency",
        Metric::Jitter => "jitter",
        Metric::Offline => "offline",
        Metric::HealthScore => "health_score",
        Metric::LatencyBaseline => "latency_baseline",
        Metric::LossBaseline => "loss_baseline",
        Metric::IpChange => "ip_change",
        Metric::IspChange => "isp_change",
        Metric::IncidentCount => "incident_count",
    }
}

async fn fire_and_dispatch(
    alert_store: &dyn AlertStore,
    http: &reqwest::Client,
    webhook_timeout: WebhookTimeoutMs,
    rule: &AlertRule,
    observed_value: f64,
    message: String,
    now: DateTime<Utc>,
) -> Result<Alert, AlertError> {
    let alert = Alert {
        id: crate::domain::AlertId::generate(),
        rule_id: rule.id,
        severity: rule.severity,
        observed_value,
        threshold: rule.threshold,
        status: AlertStatus::Active,
        triggered_at: now,
        resolved_at: None,
        acknowledged_at: None,
        acknowledged_by: None,
        message,
    };
    alert_store.insert_alert(&alert).await?;

    if rule.channels.contains(&crate::domain::NotificationChannel::Webhook) {
        if let Some(url) = &rule.webhook_url {
            let payload = WebhookPayload::from_alert(&alert, rule, metric_name(rule.metric));
            let url = url.clone();
            let secret = rule.webhook_secret.clone();
            let http = http.clone();
            let timeout = webhook_timeout.as_duration();
            tokio::spawn(async move {
                if let Err(error) =
                    dispatch_webhook(&http, &url, secret.as_deref(), &payload, timeout).await
                {
                    warn!(%error, url = %url, "webhook dispatch failed, not retried");
                }
            });
        }
    }
    Ok(alert)
}

/// Evaluates every enabled sample-metric rule in `ctx`'s workspace against
/// one arriving sample, creating and dispatching alerts for matches that
/// are not already active (§4.5 "Rule evaluation on sample").
///
/// # Errors
///
/// Returns [`AlertError`] if the rule list or dedup lookup fails.
pub async fn evaluate_sample_alerts(
    alert_store: &dyn AlertStore,
    http: &reqwest::Client,
    webhook_timeout: WebhookTimeoutMs,
    ctx: &SampleContext,
    now: DateTime<Utc>,
) -> Result<Vec<Alert>, AlertError> {
    let rules = alert_store.list_enabled_rules_for_workspace(ctx.workspace_id).await?;
    let mut triggered = Vec::new();
    for rule in rules.iter().filter(|r| sample_rule_applies(r, ctx)) {
        let Some(value) = derive_sample_metric_value(ctx.kind, &ctx.raw_payload, rule.metric) else {
            continue;
        };
        if !rule.comparison.evaluate(value, rule.threshold) {
            continue;
        }
        if alert_store.find_active_alert(rule.id).await?.is_some() {
            continue;
        }
        let message = format!(
            "{} {} {} (observed {value:.2}, threshold {:.2})",
            rule.name,
            comparison_word(rule.comparison),
            metric_name(rule.metric),
            rule.threshold
        );
        triggered.push(fire_and_dispatch(alert_store, http, webhook_timeout, rule, value, message, now).await?);
    }
    Ok(triggered)
}

fn comparison_word(comparison: Comparison) -> &'static str {
    match comparison {
        Comparison::Gt => "exceeded",
        Comparison::Lt => "dropped below",
        Comparison::Ge => "reached or exceeded",
        Comparison::Le => "reached or dropped below",
        Comparison::Eq => "equaled",
    }
}

fn incident_prefix_for(metric: Metric) -> Option<&'static str> {
    match metric {
        Metric::LatencyBaseline => Some("latency_regression_"),
        Metric::LossBaseline => Some("loss_regression_"),
        Metric::IpChange => Some("ip_change_"),
        Metric::IspChange => Some("isp_change_"),
        _ => None,
    }
}

fn rule_agent_matches(rule: &AlertRule, affected_agents: &[AgentId]) -> bool {
    rule.agent_id.is_none_or(|agent_id| affected_agents.contains(&agent_id))
}

/// Evaluates every enabled analysis-metric rule in a workspace against one
/// completed analysis cycle (§4.5 "Rule evaluation on analysis").
///
/// Emits one trigger per matching incident for the baseline/IP/ISP-change
/// metrics, and one direct-comparison trigger for `health_score` and
/// `incident_count`. Same single-active-alert-per-rule dedup applies.
///
/// # Errors
///
/// Returns [`AlertError`] if the rule list or dedup lookup fails.
pub async fn evaluate_analysis_alerts(
    alert_store: &dyn AlertStore,
    http: &reqwest::Client,
    webhook_timeout: WebhookTimeoutMs,
    analysis: &WorkspaceAnalysis,
) -> Result<Vec<Alert>, AlertError> {
    let rules = alert_store
        .list_enabled_rules_for_workspace(analysis.workspace_id)
        .await?;
    let now = analysis.generated_at;
    let mut triggered = Vec::new();

    for rule in rules.iter().filter(|r| r.metric.is_analysis_metric()) {
        if let Some(prefix) = incident_prefix_for(rule.metric) {
            for incident in analysis
                .incidents
                .iter()
                .filter(|i| i.id.starts_with(prefix) && rule_agent_matches(rule, &i.affected_agents))
            {
                if alert_store.find_active_alert(rule.id).await?.is_some() {
                    continue;
                }
                triggered.push(
                    fire_and_dispatch(alert_store, http, webhook_timeout, rule, 1.0, incident.title.clone(), now)
                        .await?,
                );
            }
            continue;
        }

        let observed = match rule.metric {
            Metric::HealthScore => rule.agent_id.map_or(Some(analysis.health.overall), |agent_id| {
                analysis
                    .agents
                    .iter()
                    .find(|a| a.agent_id == agent_id)
                    .map(|a| a.health.overall)
            }),
            Metric::IncidentCount => {
                let count = rule.agent_id.map_or_else(
                    || analysis.incidents.len(),
                    |agent_id| {
                        analysis
                            .incidents
                            .iter()
                            .filter(|i| i.affected_agents.contains(&agent_id))
                            .count()
                    },
                );
                Some(count as f64)
            }
            _ => None,
        };
        let Some(value) = observed else { continue };
        if !rule.comparison.evaluate(value, rule.threshold) {
            continue;
        }
        if alert_store.find_active_alert(rule.id).await?.is_some() {
            continue;
        }
        let message = format!(
            "{} {} {} (observed {value:.2}, threshold {:.2})",
            rule.name,
            comparison_word(rule.comparison),
            metric_name(rule.metric),
            rule.threshold
        );
        triggered.push(fire_and_dispatch(alert_store, http, webhook_timeout, rule, value, message, now).await?);
    }
    Ok(triggered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertRuleId, NotificationChannel};

    fn base_rule(metric: Metric, comparison: Comparison, threshold: f64) -> AlertRule {
        AlertRule {
            id: AlertRuleId::generate(),
            workspace_id: WorkspaceId::generate(),
            probe_id: None,
            agent_id: None,
            name: "test rule".to_string(),
            metric,
            comparison,
            threshold,
            severity: Severity::Warning,
            enabled: true,
            channels: vec![NotificationChannel::Panel],
            webhook_url: None,
            webhook_secret: None,
        }
    }

    #[test]
    fn derives_ping_packet_loss() {
        let payload = serde_json::json!({
            "sent": 10, "received": 8, "loss_pct": 20.0,
            "min_rtt_ns": 1, "avg_rtt_ns": 2, "max_rtt_ns": 3, "jitter_ns": 1
        })
        .to_string();
        let value = derive_sample_metric_value(ProbeKind::Ping, &payload, Metric::PacketLoss);
        assert_eq!(value, Some(20.0));
    }

    #[test]
    fn mtr_has_no_jitter_derivation() {
        let payload = serde_json::json!({ "hops": [] }).to_string();
        assert_eq!(derive_sample_metric_value(ProbeKind::Mtr, &payload, Metric::Jitter), None);
    }

    #[test]
    fn sample_rule_scope_filters_by_probe_and_agent() {
        let probe_id = ProbeId::generate();
        let agent_id = AgentId::generate();
        let mut rule = base_rule(Metric::PacketLoss, Comparison::Gt, 5.0);
        rule.probe_id = Some(probe_id);
        let ctx = SampleContext {
            workspace_id: rule.workspace_id,
            probe_id,
            agent_id,
            kind: ProbeKind::Ping,
            raw_payload: String::new(),
        };
        assert!(sample_rule_applies(&rule, &ctx));

        let mut other = ctx.clone();
        other.probe_id = ProbeId::generate();
        assert!(!sample_rule_applies(&rule, &other));
    }

    #[test]
    fn incident_prefix_covers_the_four_analysis_classes() {
        assert_eq!(incident_prefix_for(Metric::LatencyBaseline), Some("latency_regression_"));
        assert_eq!(incident_prefix_for(Metric::LossBaseline), Some("loss_regression_"));
        assert_eq!(incident_prefix_for(Metric::IpChange), Some("ip_change_"));
        assert_eq!(incident_prefix_for(Metric::IspChange), Some("isp_change_"));
        assert_eq!(incident_prefix_for(Metric::HealthScore), None);
    }
}
