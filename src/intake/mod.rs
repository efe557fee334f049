//! Sample Intake & Handlers (§4.2): decode one typed sample, dispatch to a
//! per-kind handler, chain to the Batch Writer, and — for selected kinds —
//! forward to the Alert Bridge.

pub mod handlers;
pub mod netinfo;

pub use handlers::HandlerRegistry;

use crate::columnar::writer::{BatchWriter, WriterError};
use crate::domain::{ProbeId, ProbeKind, ProbeSample, SampleEnvelope};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors surfaced by intake (§7 "Payload decode", "Transient store").
#[derive(Error, Debug)]
pub enum IntakeError {
    /// No handler registered for the sample's kind.
    #[error("no handler registered for kind {0:?}")]
    NoHandler(ProbeKind),
    /// The payload failed semantic validation for its kind (e.g. an MTR
    /// trace with zero hops).
    #[error("invalid payload for {probe_id}: {reason}")]
    InvalidPayload {
        /// Probe the sample belongs to.
        probe_id: ProbeId,
        /// Why validation failed.
        reason: String,
    },
    /// The payload failed to decode as JSON.
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    /// The Batch Writer rejected or failed to enqueue the row.
    #[error("writer error: {0}")]
    Writer(#[from] WriterError),
}

/// Accepts one sample envelope plus its raw JSON payload, decodes and
/// validates it via the registered handler, and hands the assembled row to
/// the Batch Writer (§4.2 "Handler contract").
///
/// Returns the assembled row so the caller (the ingress handler) can
/// forward it to the Alert Bridge for the kinds that fan out to alerts
/// (§4.2 "Kinds that fan out to alerts") — intake itself never calls the
/// bridge directly, keeping this module free of alerting concerns.
///
/// # Errors
///
/// Returns [`IntakeError::NoHandler`], [`IntakeError::InvalidPayload`],
/// [`IntakeError::Decode`], or a propagated writer error. Per §4.2,
/// "Handler failure is reported to the caller; intake does not swallow it."
#[instrument(skip(registry, writer, raw_payload), fields(kind = ?envelope.kind, probe_id = %envelope.probe_id), err)]
pub async fn ingest_sample(
    registry: &HandlerRegistry,
    writer: &dyn BatchWriter,
    envelope: SampleEnvelope,
    raw_payload: &str,
) -> Result<ProbeSample, IntakeError> {
    let handler = registry
        .get(envelope.kind)
        .ok_or(IntakeError::NoHandler(envelope.kind))?;

    let payload = handler.decode(raw_payload)?;
    handler.validate(&payload).map_err(|reason| IntakeError::InvalidPayload {
        probe_id: envelope.probe_id,
        reason,
    })?;

    let now = chrono::Utc::now();
    let sample = ProbeSample {
        id: crate::domain::SampleId::generate(),
        created_at: envelope.created_at.unwrap_or(now),
        received_at: envelope.received_at.unwrap_or(now),
        kind: envelope.kind,
        probe_id: envelope.probe_id,
        probe_agent_id: envelope.probe_agent_id,
        agent_id: envelope.reporting_agent_id,
        triggered: envelope.triggered,
        triggered_reason: envelope.triggered_reason.unwrap_or_default(),
        target: envelope.target,
        target_agent: envelope.target_agent_id,
        payload_raw: raw_payload.to_string(),
        _marker: None,
    };

    drop(payload); // validated only; the stored row carries the raw JSON verbatim
    writer.enqueue(sample.clone()).await?;
    info!(probe_id = %sample.probe_id, "sample ingested");
    Ok(sample)
}

/// Whether `kind` is one of the kinds intake forwards to the Alert Bridge
/// after a successful write (§4.2 "Kinds that fan out to alerts").
#[must_use]
pub fn fans_out_to_alerts(kind: ProbeKind) -> bool {
    kind.fans_out_to_alerts()
}

/// Logs a non-fatal Alert Bridge failure. Per §4.2, fan-out to the bridge
/// is "non-fatal asynchronous evaluation; failures there are logged only."
pub fn log_alert_fanout_failure(probe_id: ProbeId, error: &dyn std::fmt::Display) {
    warn!(probe_id = %probe_id, error = %error, "alert bridge evaluation failed, continuing");
}
