//! The Analysis Scheduler (§4.4 "On a timer", §5 "One analysis scheduler
//! activity"): a periodic, non-overlapping cycle over every workspace,
//! snapshotting results and feeding them to the Alert Bridge.

use super::workspace::{analyze_workspace, StatusSummariser};
use crate::alert::{evaluate_analysis_alerts, AlertStore};
use crate::columnar::{insert_snapshot, ClickHouseClient};
use crate::domain::{AnalysisIntervalSecs, AnalysisSnapshot, FreshnessWindowSecs, WebhookTimeoutMs};
use crate::registry::RegistryStore;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Start-up delay before the first analysis cycle fires (§5 "after an
/// initial 30 s delay").
const STARTUP_DELAY: std::time::Duration = std::time::Duration::from_secs(30);

/// The collaborators one analysis cycle needs: the columnar store for
/// reading samples and persisting snapshots, the registry for workspace
/// and agent enumeration, the alert store and HTTP client for the Alert
/// Bridge's analysis-triggered rule evaluation, and the optional
/// process-wide summariser (§5 "process-wide, set at start-up, read
/// without locking afterwards").
pub struct AnalysisDeps {
    /// Columnar store client.
    pub client: Arc<ClickHouseClient>,
    /// Registry store.
    pub registry: Arc<dyn RegistryStore>,
    /// Alert rule/instance store.
    pub alert_store: Arc<dyn AlertStore>,
    /// HTTP client used for webhook dispatch.
    pub http: reqwest::Client,
    /// Optional natural-language status summariser.
    pub summariser: Option<Arc<dyn StatusSummariser>>,
    /// Agent online/offline freshness window.
    pub freshness: FreshnessWindowSecs,
    /// Lookback window for per-probe metric aggregation.
    pub lookback_window: std::time::Duration,
    /// Cycle interval (default 300s, §6 `ANALYSIS_INTERVAL`).
    pub interval: AnalysisIntervalSecs,
    /// Webhook dispatch timeout (§5, §6).
    pub webhook_timeout: WebhookTimeoutMs,
}

/// Spawns the background analysis scheduler task (§5 "One analysis
/// scheduler activity firing every `interval`... iterating workspaces
/// sequentially within a cycle").
///
/// The returned task observes `cancellation` both during its inter-cycle
/// sleep and between workspaces within a cycle, so shutdown never waits
/// out a full cycle (§5 "the scheduler observes cancellation between
/// workspaces and exits").
pub fn spawn_analysis_scheduler(
    deps: AnalysisDeps,
    cancellation: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_scheduler(deps, cancellation))
}

async fn run_scheduler(deps: AnalysisDeps, cancellation: CancellationToken) {
    tokio::select! {
        () = tokio::time::sleep(STARTUP_DELAY) => {}
        () = cancellation.cancelled() => {
            info!("analysis scheduler cancelled during start-up delay");
            return;
        }
    }

    // `Delay` rather than the default `Burst`: an overrunning cycle skips
    // the ticks it ate through instead of firing a catch-up burst
    // afterward (§5 "if a cycle overruns the interval, the next tick is
    // skipped").
    let mut ticker = tokio::time::interval(deps.interval.as_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = cancellation.cancelled() => {
                info!("analysis scheduler cancelled, exiting");
                return;
            }
            _ = ticker.tick() => {
                run_cycle(&deps, &cancellation).await;
            }
        }
    }
}

#[instrument(skip(deps, cancellation))]
async fn run_cycle(deps: &AnalysisDeps, cancellation: &CancellationToken) {
    let workspaces = match deps.registry.list_workspaces().await {
        Ok(workspaces) => workspaces,
        Err(error) => {
            warn!(%error, "failed to list workspaces, skipping this cycle");
            return;
        }
    };

    for workspace in workspaces {
        if cancellation.is_cancelled() {
            info!("analysis scheduler cancelled mid-cycle, exiting");
            return;
        }

        let agents = match deps.registry.list_agents_for_workspace(workspace.id).await {
            Ok(agents) => agents,
            Err(error) => {
                warn!(workspace_id = %workspace.id, %error, "failed to list agents, skipping workspace");
                continue;
            }
        };
        if agents.is_empty() {
            continue;
        }

        if let Err(error) = run_one_workspace(deps, workspace.id).await {
            warn!(workspace_id = %workspace.id, %error, "analysis cycle failed for workspace, continuing");
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CycleError {
    #[error(transparent)]
    Analysis(#[from] super::per_probe::AnalysisError),
    #[error(transparent)]
    Snapshot(#[from] crate::columnar::SnapshotError),
    #[error(transparent)]
    Alert(#[from] crate::alert::AlertError),
    #[error("snapshot serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

async fn run_one_workspace(deps: &AnalysisDeps, workspace_id: crate::domain::WorkspaceId) -> Result<(), CycleError> {
    let now = chrono::Utc::now();
    let summariser = deps.summariser.as_deref();
    let analysis = analyze_workspace(
        &deps.client,
        deps.registry.as_ref(),
        workspace_id,
        now,
        deps.freshness,
        deps.lookback_window,
        summariser,
    )
    .await?;

    let snapshot = AnalysisSnapshot::from_analysis(&analysis)?;
    insert_snapshot(&deps.client, &snapshot).await?;

    let triggered = evaluate_analysis_alerts(
        deps.alert_store.as_ref(),
        &deps.http,
        deps.webhook_timeout,
        &analysis,
    )
    .await?;
    if !triggered.is_empty() {
        info!(workspace_id = %workspace_id, count = triggered.len(), "analysis cycle raised alerts");
    }

    info!(
        workspace_id = %workspace_id,
        incidents = analysis.incidents.len(),
        status = ?analysis.status.status,
        "analysis cycle complete"
    );
    Ok(())
}
