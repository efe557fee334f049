//! Webhook notification dispatch (§4.5 "Notification dispatch"): a fixed
//! JSON envelope, HMAC-SHA256 request signing, fire-and-forget semantics.

use crate::domain::{Alert, AlertRule, Severity};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Errors from webhook dispatch. Per §7 "External notify", these are
/// logged by the caller and never propagated to the producer.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// The request failed to send, or the server responded within the
    /// timeout but with a transport-level error.
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server responded with a status `>= 400`.
    #[error("webhook returned status {0}")]
    ServerStatus(reqwest::StatusCode),
}

/// The fixed JSON envelope posted to a rule's webhook URL (§6 "Webhook
/// payload").
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    /// Triggered alert id.
    pub alert_id: String,
    /// Owning workspace id.
    pub workspace_id: String,
    /// Scoped probe id, when the rule was probe-scoped.
    pub probe_id: Option<String>,
    /// Scoped agent id, when the rule was agent-scoped.
    pub agent_id: Option<String>,
    /// Metric name, snake_case.
    pub metric: String,
    /// Observed value that tripped the rule.
    pub value: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// Severity.
    pub severity: String,
    /// Rendered alert message.
    pub message: String,
    /// Trigger time, RFC 3339.
    pub triggered_at: DateTime<Utc>,
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

impl WebhookPayload {
    /// Builds the envelope for one triggered alert against its rule.
    #[must_use]
    pub fn from_alert(alert: &Alert, rule: &AlertRule, metric: &str) -> Self {
        Self {
            alert_id: alert.id.to_string(),
            workspace_id: rule.workspace_id.to_string(),
            probe_id: rule.probe_id.map(|id| id.to_string()),
            agent_id: rule.agent_id.map(|id| id.to_string()),
            metric: metric.to_string(),
            value: alert.observed_value,
            threshold: alert.threshold,
            severity: severity_str(alert.severity).to_string(),
            message: alert.message.clone(),
            triggered_at: alert.triggered_at,
        }
    }
}

fn sign(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Posts the webhook payload to `url`, signing the body when `secret` is
/// set (§4.5/§6). Fire-and-forget: callers log the error and move on,
/// never retrying and never blocking the intake or analysis paths.
///
/// # Errors
///
/// Returns [`WebhookError`] on a transport failure or a `>= 400` response.
#[instrument(skip(client, payload, secret), fields(url = %url), err)]
pub async fn dispatch_webhook(
    client: &reqwest::Client,
    url: &str,
    secret: Option<&str>,
    payload: &WebhookPayload,
    timeout: std::time::Duration,
) -> Result<(), WebhookError> {
    let body = serde_json::to_string(payload).unwrap_or_default();
    let mut request = client
        .post(url)
        .timeout(timeout)
        .header("Content-Type", "application/json")
        .header("User-Agent", "NetWatcher-Alert/1.0");
    if let Some(secret) = secret {
        request = request.header("X-Signature", sign(secret, &body));
    }
    let response = request.body(body).send().await?;
    let status = response.status();
    if status.as_u16() >= 400 {
        warn!(%status, url = %url, "webhook responded with an error status");
        return Err(WebhookError::ServerStatus(status));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_produces_stable_hex_digest() {
        let sig = sign("topsecret", "{\"a\":1}");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }

    #[test]
    fn sign_changes_with_body() {
        let a = sign("topsecret", "{\"a\":1}");
        let b = sign("topsecret", "{\"a\":2}");
        assert_ne!(a, b);
    }
}
