//! AlertRule and Alert — rule-based alert evaluation entities (§3).

use super::ids::{AgentId, AlertId, AlertRuleId, ProbeId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric an alert rule evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Packet loss percentage.
    PacketLoss,
    /// Latency in milliseconds.
    Latency,
    /// Jitter in milliseconds.
    Jitter,
    /// Agent offline (boolean-as-threshold, any nonzero observed value trips it).
    Offline,
    /// Overall workspace/agent health score.
    HealthScore,
    /// Latency baseline regression (§4.4).
    LatencyBaseline,
    /// Loss baseline regression (§4.4).
    LossBaseline,
    /// Public IP change (§4.4).
    IpChange,
    /// ISP change (§4.4).
    IspChange,
    /// Open incident count.
    IncidentCount,
}

impl Metric {
    /// Metrics evaluated directly against a single sample by the Intake
    /// fan-out path (§4.2/§4.5 "Rule evaluation on sample").
    #[must_use]
    pub fn is_sample_metric(self) -> bool {
        matches!(self, Self::PacketLoss | Self::Latency | Self::Jitter)
    }

    /// Metrics evaluated against analysis-cycle output (§4.5 "Rule
    /// evaluation on analysis").
    #[must_use]
    pub fn is_analysis_metric(self) -> bool {
        !self.is_sample_metric()
    }
}

/// Comparison operator for rule thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Equal.
    Eq,
}

impl Comparison {
    /// Evaluates `observed <op> threshold`.
    #[must_use]
    pub fn evaluate(self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => observed > threshold,
            Self::Lt => observed < threshold,
            Self::Ge => observed >= threshold,
            Self::Le => observed <= threshold,
            // Float equality on operator-configured thresholds: rules are
            // authored by operators against known round values, so an exact
            // compare (no epsilon) matches what they typed.
            Self::Eq => (observed - threshold).abs() < f64::EPSILON,
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Critical.
    Critical,
}

/// Notification channel an alert rule can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Implicit: the alert is readable in the panel.
    Panel,
    /// Delegated to an external email queue (§4.5, interface contract only).
    Email,
    /// HTTP POST webhook.
    Webhook,
}

/// Alert rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule identifier.
    pub id: AlertRuleId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Optional probe scope.
    pub probe_id: Option<ProbeId>,
    /// Optional agent scope.
    pub agent_id: Option<AgentId>,
    /// Human-readable name.
    pub name: String,
    /// Metric this rule evaluates.
    pub metric: Metric,
    /// Comparison operator.
    pub comparison: Comparison,
    /// Threshold value.
    pub threshold: f64,
    /// Severity assigned to alerts this rule creates.
    pub severity: Severity,
    /// Whether this rule is active.
    pub enabled: bool,
    /// Notification channels this rule dispatches to.
    pub channels: Vec<NotificationChannel>,
    /// Webhook URL, required when `channels` contains `Webhook`.
    pub webhook_url: Option<String>,
    /// Webhook HMAC secret, optional even when a webhook URL is set.
    pub webhook_secret: Option<String>,
}

/// Status of an alert instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Open and unacknowledged.
    Active,
    /// Open and acknowledged by an operator.
    Acknowledged,
    /// Closed.
    Resolved,
}

/// An open or closed incident instance created by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier.
    pub id: AlertId,
    /// Rule that created this alert.
    pub rule_id: AlertRuleId,
    /// Severity copied from the rule at trigger time.
    pub severity: Severity,
    /// Observed value that tripped the rule.
    pub observed_value: f64,
    /// Threshold copied from the rule at trigger time.
    pub threshold: f64,
    /// Current status.
    pub status: AlertStatus,
    /// When the alert was triggered.
    pub triggered_at: DateTime<Utc>,
    /// When the alert was resolved, if it has been.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the alert was acknowledged, if it has been.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged the alert, if it has been.
    pub acknowledged_by: Option<String>,
    /// Rendered alert message.
    pub message: String,
}
