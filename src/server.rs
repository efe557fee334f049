//! HTTP surface (§6 "External interfaces"): the inbound sample ingress
//! endpoint and the on-demand query surface the front-end consumes through
//! this collaborator — range by probe, flexible finder, latest by
//! kind/agent, aggregated range, per-probe analysis, workspace analysis,
//! snapshot history, connectivity matrix, network map.

use crate::alert::{evaluate_sample_alerts, AlertStore, SampleContext};
use crate::analysis::connectivity::{connectivity_matrix, network_map, ConnectivityMatrix, NetworkMap};
use crate::analysis::per_probe::analyze_probe;
use crate::analysis::workspace::{analyze_workspace, StatusSummariser};
use crate::columnar::aggregate::{
    aggregate_mtr, aggregate_other, aggregate_ping, aggregate_trafficsim, MtrAggregateItem,
    OtherBucket, PingBucket, TrafficSimBucket,
};
use crate::columnar::query::{flexible_find, latest_by_kind_agent, latest_n_by_kind_agent, range_by_probe, FinderFilter, ProbeDataRow};
use crate::columnar::{fetch_snapshot_history, BatchWriter, ClickHouseClient};
use crate::domain::{
    AggregationRowCap, AnalysisSnapshot, FreshnessWindowSecs, ProbeId, ProbeKind, SampleEnvelope,
    WebhookTimeoutMs, WorkspaceAnalysis, WorkspaceId,
};
use crate::error::AppError;
use crate::intake::{fans_out_to_alerts, ingest_sample, log_alert_fanout_failure, HandlerRegistry};
use crate::registry::RegistryStore;
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// The collaborators every handler needs, shared across requests via
/// `axum::State`.
pub struct AppState {
    /// Columnar store client.
    pub client: Arc<ClickHouseClient>,
    /// Probe Registry.
    pub registry: Arc<dyn RegistryStore>,
    /// Batch Writer (or a direct-insert fallback in test mode).
    pub writer: Arc<dyn BatchWriter>,
    /// Per-kind sample handlers.
    pub handlers: Arc<HandlerRegistry>,
    /// Alert rule/instance store.
    pub alert_store: Arc<dyn AlertStore>,
    /// HTTP client used for webhook dispatch.
    pub http: reqwest::Client,
    /// Optional natural-language status summariser.
    pub summariser: Option<Arc<dyn StatusSummariser>>,
    /// Agent online/offline freshness window.
    pub freshness: FreshnessWindowSecs,
    /// Webhook dispatch timeout.
    pub webhook_timeout: WebhookTimeoutMs,
    /// Default lookback window for on-demand range/analysis queries.
    pub default_window: std::time::Duration,
    /// Hard cap on rows returned by a single read or aggregation.
    pub row_cap: AggregationRowCap,
}

type SharedState = Arc<AppState>;

/// Builds the application router over `state` (§6).
#[must_use]
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(|| async { Html("netwatcher-controller") }))
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/samples", post(ingest_sample_handler))
        .route("/api/v1/probes/{probe_id}/samples", get(range_by_probe_handler))
        .route("/api/v1/probes/{probe_id}/aggregate", get(aggregate_range_handler))
        .route("/api/v1/probes/{probe_id}/analysis", get(per_probe_analysis_handler))
        .route("/api/v1/samples/find", get(flexible_find_handler))
        .route("/api/v1/samples/latest", get(latest_handler))
        .route("/api/v1/workspaces/{workspace_id}/analysis", get(workspace_analysis_handler))
        .route("/api/v1/workspaces/{workspace_id}/snapshots", get(snapshot_history_handler))
        .route("/api/v1/workspaces/{workspace_id}/connectivity", get(connectivity_handler))
        .route("/api/v1/workspaces/{workspace_id}/network-map", get(network_map_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds a `TcpListener` on `addr`.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Serves `router` on `listener` until the process is killed.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, router).await
}

/// Serves `router` on `listener` until `shutdown_token` is cancelled,
/// letting in-flight requests finish first (§5 "graceful shutdown").
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> Result<(), std::io::Error> {
    let shutdown_signal = async move {
        shutdown_token.cancelled().await;
        info!("shutdown signal received, draining in-flight requests");
    };
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    #[serde(flatten)]
    envelope: SampleEnvelope,
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    id: String,
}

/// `POST /api/v1/samples` — decodes one envelope+payload, writes it through
/// the Batch Writer, and — for kinds that fan out (§4.2) — fires the Alert
/// Bridge asynchronously without blocking the response.
#[instrument(skip(state, body), err)]
async fn ingest_sample_handler(
    State(state): State<SharedState>,
    Json(body): Json<IngestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let raw_payload = serde_json::to_string(&body.payload).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let sample = ingest_sample(&state.handlers, state.writer.as_ref(), body.envelope, &raw_payload).await?;

    if fans_out_to_alerts(sample.kind) {
        spawn_alert_fanout(&state, &sample);
    }

    Ok((StatusCode::CREATED, Json(IngestResponse { id: sample.id.to_string() })))
}

fn spawn_alert_fanout(state: &SharedState, sample: &crate::domain::ProbeSample) {
    let state = Arc::clone(state);
    let probe_id = sample.probe_id;
    let agent_id = sample.agent_id;
    let kind = sample.kind;
    let raw_payload = sample.payload_raw.clone();
    tokio::spawn(async move {
        let probe = match state.registry.get_probe(probe_id).await {
            Ok(Some(probe)) => probe,
            Ok(None) => {
                log_alert_fanout_failure(probe_id, &"probe not found for alert fan-out");
                return;
            }
            Err(error) => {
                log_alert_fanout_failure(probe_id, &error);
                return;
            }
        };
        let ctx = SampleContext {
            workspace_id: probe.workspace_id,
            probe_id,
            agent_id,
            kind,
            raw_payload,
        };
        if let Err(error) = evaluate_sample_alerts(
            state.alert_store.as_ref(),
            &state.http,
            state.webhook_timeout,
            &ctx,
            chrono::Utc::now(),
        )
        .await
        {
            log_alert_fanout_failure(probe_id, &error);
        }
    });
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    since: Option<chrono::DateTime<chrono::Utc>>,
    until: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<usize>,
}

/// `GET /api/v1/probes/{probe_id}/samples` — range by probe (§4.3).
#[instrument(skip(state), err)]
async fn range_by_probe_handler(
    State(state): State<SharedState>,
    Path(probe_id): Path<ProbeId>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<ProbeDataRow>>, AppError> {
    let until = query.until.unwrap_or_else(chrono::Utc::now);
    let since = query.since.unwrap_or_else(|| until - chrono::Duration::from_std(state.default_window).unwrap_or_else(|_| chrono::Duration::hours(1)));
    let limit = row_limit(&state, query.limit);
    let rows = range_by_probe(&state.client, probe_id, since, until, limit).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct FindQuery {
    kind: Option<ProbeKind>,
    agent_id: Option<crate::domain::AgentId>,
    #[serde(default)]
    triggered_only: bool,
    target_prefix: Option<String>,
    since: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<usize>,
}

/// `GET /api/v1/samples/find` — flexible finder (§4.3).
#[instrument(skip(state), err)]
async fn flexible_find_handler(
    State(state): State<SharedState>,
    Query(query): Query<FindQuery>,
) -> Result<Json<Vec<ProbeDataRow>>, AppError> {
    let filter = FinderFilter {
        kind: query.kind,
        agent_id: query.agent_id,
        triggered_only: query.triggered_only,
        target_prefix: query.target_prefix,
        since: query.since,
    };
    let limit = row_limit(&state, query.limit);
    let rows = flexible_find(&state.client, &filter, limit).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    kind: ProbeKind,
    agent_id: crate::domain::AgentId,
    n: Option<u32>,
}

/// `GET /api/v1/samples/latest` — latest by kind+agent, or the newest `n`
/// when `n` is given (§4.3).
#[instrument(skip(state), err)]
async fn latest_handler(
    State(state): State<SharedState>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Vec<ProbeDataRow>>, AppError> {
    let rows = match query.n {
        Some(n) => latest_n_by_kind_agent(&state.client, query.kind, query.agent_id, n).await?,
        None => latest_by_kind_agent(&state.client, query.kind, query.agent_id).await?.into_iter().collect(),
    };
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct AggregateQuery {
    since: Option<chrono::DateTime<chrono::Utc>>,
    until: Option<chrono::DateTime<chrono::Utc>>,
    bucket_secs: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AggregateResponse {
    Ping(Vec<PingBucket>),
    TrafficSim(Vec<TrafficSimBucket>),
    Mtr(Vec<MtrAggregateItem>),
    Other(Vec<OtherBucket>),
}

/// `GET /api/v1/probes/{probe_id}/aggregate` — time-bucket aggregation on
/// read, dispatched by the probe's kind (§4.3).
#[instrument(skip(state), err)]
async fn aggregate_range_handler(
    State(state): State<SharedState>,
    Path(probe_id): Path<ProbeId>,
    Query(query): Query<AggregateQuery>,
) -> Result<Json<AggregateResponse>, AppError> {
    let probe = state
        .registry
        .get_probe(probe_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("probe {probe_id}")))?;

    let until = query.until.unwrap_or_else(chrono::Utc::now);
    let since = query.since.unwrap_or_else(|| until - chrono::Duration::from_std(state.default_window).unwrap_or_else(|_| chrono::Duration::hours(1)));
    let limit = row_limit(&state, query.limit);
    let bucket = std::time::Duration::from_secs(query.bucket_secs.unwrap_or(60));

    let rows = range_by_probe(&state.client, probe_id, since, until, limit).await?;
    let response = match probe.kind {
        ProbeKind::TrafficSim => AggregateResponse::TrafficSim(aggregate_trafficsim(&rows, bucket).map_err(crate::analysis::per_probe::AnalysisError::from)?),
        ProbeKind::Mtr => AggregateResponse::Mtr(aggregate_mtr(&rows, bucket, limit.as_usize()).map_err(crate::analysis::per_probe::AnalysisError::from)?),
        ProbeKind::Ping | ProbeKind::Agent => AggregateResponse::Ping(aggregate_ping(&rows, bucket).map_err(crate::analysis::per_probe::AnalysisError::from)?),
        _ => AggregateResponse::Other(aggregate_other(&rows, bucket)),
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    window_secs: Option<u64>,
}

fn window_or_default(state: &AppState, window_secs: Option<u64>) -> std::time::Duration {
    window_secs.map_or(state.default_window, std::time::Duration::from_secs)
}

/// `GET /api/v1/probes/{probe_id}/analysis` — per-probe analysis (§4.4).
#[instrument(skip(state), err)]
async fn per_probe_analysis_handler(
    State(state): State<SharedState>,
    Path(probe_id): Path<ProbeId>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<crate::domain::analysis::ProbeAnalysis>, AppError> {
    let probe = state
        .registry
        .get_probe(probe_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("probe {probe_id}")))?;
    let window = window_or_default(&state, query.window_secs);
    let analysis = analyze_probe(&state.client, state.registry.as_ref(), &probe, window, chrono::Utc::now()).await?;
    Ok(Json(analysis))
}

/// `GET /api/v1/workspaces/{workspace_id}/analysis` — workspace analysis
/// (§4.4).
#[instrument(skip(state), err)]
async fn workspace_analysis_handler(
    State(state): State<SharedState>,
    Path(workspace_id): Path<WorkspaceId>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<WorkspaceAnalysis>, AppError> {
    let window = window_or_default(&state, query.window_secs);
    let analysis = analyze_workspace(
        &state.client,
        state.registry.as_ref(),
        workspace_id,
        chrono::Utc::now(),
        state.freshness,
        window,
        state.summariser.as_deref(),
    )
    .await?;
    Ok(Json(analysis))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

/// `GET /api/v1/workspaces/{workspace_id}/snapshots` — snapshot history
/// (§6).
#[instrument(skip(state), err)]
async fn snapshot_history_handler(
    State(state): State<SharedState>,
    Path(workspace_id): Path<WorkspaceId>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<AnalysisSnapshot>>, AppError> {
    let snapshots = fetch_snapshot_history(&state.client, workspace_id, query.limit.unwrap_or(50)).await?;
    Ok(Json(snapshots))
}

/// `GET /api/v1/workspaces/{workspace_id}/connectivity` — connectivity
/// matrix (§6).
#[instrument(skip(state), err)]
async fn connectivity_handler(
    State(state): State<SharedState>,
    Path(workspace_id): Path<WorkspaceId>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ConnectivityMatrix>, AppError> {
    let window = window_or_default(&state, query.window_secs);
    let matrix = connectivity_matrix(&state.client, state.registry.as_ref(), workspace_id, window, chrono::Utc::now()).await?;
    Ok(Json(matrix))
}

/// `GET /api/v1/workspaces/{workspace_id}/network-map` — network map (§6).
#[instrument(skip(state), err)]
async fn network_map_handler(
    State(state): State<SharedState>,
    Path(workspace_id): Path<WorkspaceId>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<NetworkMap>, AppError> {
    let window = window_or_default(&state, query.window_secs);
    let map = network_map(&state.client, state.registry.as_ref(), workspace_id, window, chrono::Utc::now()).await?;
    Ok(Json(map))
}

fn row_limit(state: &AppState, requested: Option<usize>) -> AggregationRowCap {
    requested
        .and_then(|n| AggregationRowCap::try_new(n).ok())
        .unwrap_or(state.row_cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_request_flattens_envelope_alongside_payload() {
        let body = serde_json::json!({
            "kind": "PING",
            "probe_id": crate::domain::ProbeId::generate().to_string(),
            "probe_agent_id": crate::domain::AgentId::generate().to_string(),
            "reporting_agent_id": crate::domain::AgentId::generate().to_string(),
            "created_at": null,
            "received_at": null,
            "triggered": false,
            "triggered_reason": null,
            "target": "8.8.8.8",
            "target_agent_id": null,
            "payload": {"sent": 10, "received": 10, "loss_pct": 0.0, "min_rtt_ns": 1, "avg_rtt_ns": 1, "max_rtt_ns": 1, "jitter_ns": 0}
        });
        let parsed: IngestRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.envelope.target, "8.8.8.8");
        assert_eq!(parsed.payload["sent"], 10);
    }
}
