//! `SQLite` persistence for alert rules and alert instances (§3, §6
//! "Relational tables"), grounded on the same row-mapping idiom as
//! [`crate::registry::store::SqliteRegistryStore`].

use super::AlertError;
use crate::domain::{
    Alert, AlertId, AlertRule, AlertRuleId, AlertStatus, Comparison, Metric, NotificationChannel,
    ProbeId, Severity, WorkspaceId,
};
use crate::relational::RelationalConnection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

/// Relational persistence boundary for the Alert Pipeline. Kept as a trait
/// so rule evaluation can be exercised against an in-memory fake in tests.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Lists every enabled rule in a workspace.
    async fn list_enabled_rules_for_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<AlertRule>, AlertError>;

    /// Returns the rule's currently `active` alert, if one exists
    /// (§4.5 "single-alert-per-rule deduplication").
    async fn find_active_alert(&self, rule_id: AlertRuleId) -> Result<Option<Alert>, AlertError>;

    /// Persists a newly triggered alert.
    async fn insert_alert(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// `SQLite`-backed [`AlertStore`].
pub struct SqliteAlertStore {
    connection: RelationalConnection,
}

impl SqliteAlertStore {
    /// Wraps an initialized relational connection.
    #[must_use]
    pub fn new(connection: RelationalConnection) -> Self {
        Self { connection }
    }
}

fn metric_to_str(metric: Metric) -> &'static str {
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

fn parse_metric(raw: &str) -> Result<Metric, AlertError> {
    Ok(match raw {
        "packet_loss" => Metric::PacketLoss,
        "latency" => Metric::Latency,
        "jitter" => Metric::Jitter,
        "offline" => Metric::Offline,
        "health_score" => Metric::HealthScore,
        "latency_baseline" => Metric::LatencyBaseline,
        "loss_baseline" => Metric::LossBaseline,
        "ip_change" => Metric::IpChange,
        "isp_change" => Metric::IspChange,
        _ => Metric::IncidentCount,
    })
}

fn comparison_to_str(comparison: Comparison) -> &'static str {
    match comparison {
        Comparison::Gt => "gt",
        Comparison::Lt => "lt",
        Comparison::Ge => "ge",
        Comparison::Le => "le",
        Comparison::Eq => "eq",
    }
}

fn parse_comparison(raw: &str) -> Comparison {
    match raw {
        "lt" => Comparison::Lt,
        "ge" => Comparison::Ge,
        "le" => Comparison::Le,
        "eq" => Comparison::Eq,
        _ => Comparison::Gt,
    }
}

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

fn parse_severity(raw: &str) -> Severity {
    match raw {
        "critical" => Severity::Critical,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn parse_channel(raw: &str) -> Option<NotificationChannel> {
    match raw {
        "panel" => Some(NotificationChannel::Panel),
        "email" => Some(NotificationChannel::Email),
        "webhook" => Some(NotificationChannel::Webhook),
        _ => None,
    }
}

fn parse_uuid_col<T: From<uuid::Uuid>>(
    row: &sqlx::sqlite::SqliteRow,
    col: &str,
) -> Result<T, AlertError> {
    let raw: String = row.try_get(col)?;
    let uuid = raw
        .parse::<uuid::Uuid>()
        .map_err(|e| AlertError::InvalidInput(e.to_string()))?;
    Ok(T::from(uuid))
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<AlertRule, AlertError> {
    let probe_id: Option<String> = row.try_get("probe_id")?;
    let agent_id: Option<String> = row.try_get("agent_id")?;
    let channels_json: String = row.try_get("channels_json")?;
    let raw_channels: Vec<String> = serde_json::from_str(&channels_json)?;
    Ok(AlertRule {
        id: parse_uuid_col::<AlertRuleId>(row, "id")?,
        workspace_id: parse_uuid_col::<WorkspaceId>(row, "workspace_id")?,
        probe_id: probe_id
            .and_then(|p| p.parse::<uuid::Uuid>().ok())
            .map(ProbeId::from),
        agent_id: agent_id
            .and_then(|a| a.parse::<uuid::Uuid>().ok())
            .map(crate::domain::AgentId::from),
        name: row.try_get("name")?,
        metric: parse_metric(row.try_get::<String, _>("metric")?.as_str())?,
        comparison: parse_comparison(row.try_get::<String, _>("comparison")?.as_str()),
        threshold: row.try_get("threshold")?,
        severity: parse_severity(row.try_get::<String, _>("severity")?.as_str()),
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        channels: raw_channels.iter().filter_map(|c| parse_channel(c)).collect(),
        webhook_url: row.try_get("webhook_url")?,
        webhook_secret: row.try_get("webhook_secret")?,
    })
}

fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> Result<Alert, AlertError> {
    let status: String = row.try_get("status")?;
    let triggered_at: String = row.try_get("triggered_at")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;
    let acknowledged_at: Option<String> = row.try_get("acknowledged_at")?;
    Ok(Alert {
        id: parse_uuid_col::<AlertId>(row, "id")?,
        rule_id: parse_uuid_col::<AlertRuleId>(row, "rule_id")?,
        severity: parse_severity(row.try_get::<String, _>("severity")?.as_str()),
        observed_value: row.try_get("observed_value")?,
        threshold: row.try_get("threshold")?,
        status: match status.as_str() {
            "acknowledged" => AlertStatus::Acknowledged,
            "resolved" => AlertStatus::Resolved,
            _ => AlertStatus::Active,
        },
        triggered_at: parse_timestamp(&triggered_at),
        resolved_at: resolved_at.as_deref().map(parse_timestamp),
        acknowledged_at: acknowledged_at.as_deref().map(parse_timestamp),
        acknowledged_by: row.try_get("acknowledged_by")?,
        message: row.try_get("message")?,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    #[instrument(skip(self), err)]
    async fn list_enabled_rules_for_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<AlertRule>, AlertError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, probe_id, agent_id, name, metric, comparison, threshold, \
             severity, enabled, channels_json, webhook_url, webhook_secret FROM alert_rules \
             WHERE workspace_id = ?1 AND enabled = 1",
        )
        .bind(workspace_id.to_string())
        .fetch_all(self.connection.pool())
        .await?;
        rows.iter().map(row_to_rule).collect()
    }

    #[instrument(skip(self), err)]
    async fn find_active_alert(&self, rule_id: AlertRuleId) -> Result<Option<Alert>, AlertError> {
        let row = sqlx::query(
            "SELECT id, rule_id, severity, observed_value, threshold, status, triggered_at, \
             resolved_at, acknowledged_at, acknowledged_by, message FROM alerts \
             WHERE rule_id = ?1 AND status = 'active' LIMIT 1",
        )
        .bind(rule_id.to_string())
        .fetch_optional(self.connection.pool())
        .await?;
        row.map(|r| row_to_alert(&r)).transpose()
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id), err)]
    async fn insert_alert(&self, alert: &Alert) -> Result<(), AlertError> {
        sqlx::query(
            "INSERT INTO alerts (id, rule_id, severity, observed_value, threshold, status, \
             triggered_at, resolved_at, acknowledged_at, acknowledged_by, message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(alert.id.to_string())
        .bind(alert.rule_id.to_string())
        .bind(severity_to_str(alert.severity))
        .bind(alert.observed_value)
        .bind(alert.threshold)
        .bind(match alert.status {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        })
        .bind(alert.triggered_at.to_rfc3339())
        .bind(alert.resolved_at.map(|t| t.to_rfc3339()))
        .bind(alert.acknowledged_at.map(|t| t.to_rfc3339()))
        .bind(&alert.acknowledged_by)
        .bind(&alert.message)
        .execute(self.connection.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_round_trips_through_str() {
        for metric in [
            Metric::PacketLoss,
            Metric::Latency,
            Metric::Jitter,
            Metric::Offline,
            Metric::HealthScore,
            Metric::LatencyBaseline,
            Metric::LossBaseline,
            Metric::IpChange,
            Metric::IspChange,
            Metric::IncidentCount,
        ] {
            assert_eq!(parse_metric(metric_to_str(metric)).unwrap(), metric);
        }
    }

    #[test]
    fn comparison_round_trips_through_str() {
        for comparison in [Comparison::Gt, Comparison::Lt, Comparison::Ge, Comparison::Le, Comparison::Eq] {
            assert_eq!(parse_comparison(comparison_to_str(comparison)), comparison);
        }
    }

    #[test]
    fn severity_round_trips_through_str() {
        for severity in [Severity::Info, Severity::Warning, Severity::Critical] {
            assert_eq!(parse_severity(severity_to_str(severity)), severity);
        }
    }
}
