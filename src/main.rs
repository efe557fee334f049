//! Controller entry point: parses start-up configuration, wires the
//! relational and columnar stores, spawns the three long-lived activities
//! named in §5 (ingress server, batch writer, analysis scheduler), and
//! serves until a shutdown signal arrives.

use anyhow::{Context, Result};
use clap::Parser;
use netwatcher_controller::alert::SqliteAlertStore;
use netwatcher_controller::analysis::scheduler::{spawn_analysis_scheduler, AnalysisDeps};
use netwatcher_controller::columnar::{ClickHouseClient, ClickHouseConfig, ColumnarBatchWriter};
use netwatcher_controller::config::Args;
use netwatcher_controller::intake::HandlerRegistry;
use netwatcher_controller::registry::SqliteRegistryStore;
use netwatcher_controller::relational::{DatabasePath, RelationalConfig, RelationalConnection};
use netwatcher_controller::server::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    netwatcher_controller::observability::init_tracing()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let args = Args::parse();
    info!(
        clickhouse_host = %args.clickhouse_host,
        bind_addr = %args.bind_addr,
        "starting netwatcher-controller"
    );

    let writer_queue_capacity = args.writer_queue_capacity().context("writer_queue_capacity")?;
    let flush_batch_size = args.flush_batch_size().context("flush_batch_size")?;
    let flush_interval = args.flush_interval_ms().context("flush_interval_ms")?;
    let flush_timeout = args.flush_timeout_ms().context("flush_timeout_ms")?;
    let statement_timeout = args.columnar_statement_timeout().context("columnar_statement_timeout_secs")?;
    let row_cap = args.aggregation_row_cap().context("aggregation_row_cap")?;
    let freshness = args.freshness_window().context("freshness_secs")?;
    let webhook_timeout = args.webhook_timeout().context("webhook_timeout_ms")?;
    let analysis_interval = args.analysis_interval().context("analysis_interval_secs")?;
    let db_pool_size = args.db_pool_size().context("db_pool_size")?;
    // Retention is enforced by the TTL clause baked into the columnar
    // migration (§3, §6); validated here so a bad flag fails fast at
    // start-up rather than silently falling back to the table default.
    let _retention_days = args.retention_days().context("retention_days")?;

    let clickhouse = Arc::new(
        ClickHouseClient::new(ClickHouseConfig {
            host: args.clickhouse_host.clone(),
            port: args.clickhouse_port,
            user: args.clickhouse_user.clone(),
            password: args.clickhouse_password.clone(),
            database: args.clickhouse_db.clone(),
            statement_timeout,
        })
        .context("failed to build columnar client")?,
    );

    let db_path = DatabasePath::new(&args.db_path).context("invalid relational database path")?;
    let relational_config = RelationalConfig::new(db_path).with_pool_size(db_pool_size);
    let relational = RelationalConnection::initialize(relational_config)
        .await
        .context("failed to initialize relational store")?;

    let registry: Arc<dyn netwatcher_controller::registry::RegistryStore> =
        Arc::new(SqliteRegistryStore::new(relational.clone()));
    let alert_store: Arc<dyn netwatcher_controller::alert::AlertStore> =
        Arc::new(SqliteAlertStore::new(relational.clone()));
    let handlers = Arc::new(HandlerRegistry::with_default_handlers());
    let http = reqwest::Client::new();

    let shutdown = CancellationToken::new();

    let (writer, writer_handle) = ColumnarBatchWriter::spawn(
        Arc::clone(&clickhouse),
        writer_queue_capacity,
        flush_batch_size,
        flush_interval,
        flush_timeout,
        shutdown.clone(),
    );
    let writer: Arc<dyn netwatcher_controller::columnar::BatchWriter> = Arc::new(writer);

    // No natural-language summariser is wired at start-up; the analysis
    // path falls back to the rule-based message per §4.4/§9(c). A real
    // deployment would install one here and hand its `Arc` to both
    // `AppState` and `AnalysisDeps`.
    let summariser: Option<Arc<dyn netwatcher_controller::analysis::workspace::StatusSummariser>> = None;

    let analysis_deps = AnalysisDeps {
        client: Arc::clone(&clickhouse),
        registry: Arc::clone(&registry),
        alert_store: Arc::clone(&alert_store),
        http: http.clone(),
        summariser: summariser.clone(),
        freshness,
        lookback_window: Duration::from_secs(args.default_window_secs),
        interval: analysis_interval,
        webhook_timeout,
    };
    let scheduler_handle = spawn_analysis_scheduler(analysis_deps, shutdown.clone());

    let state = Arc::new(AppState {
        client: clickhouse,
        registry,
        writer,
        handlers,
        alert_store,
        http,
        summariser,
        freshness,
        webhook_timeout,
        default_window: Duration::from_secs(args.default_window_secs),
        row_cap,
    });

    let router = server::create_router(state);
    let addr = args.bind_addr.parse().context("invalid bind address")?;
    let (listener, actual_addr) = server::bind(addr).await.context("failed to bind ingress listener")?;
    info!(addr = %actual_addr, "ingress and query surface listening");

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            ctrl_c_shutdown.cancel();
        }
    });

    server::serve_with_graceful_shutdown(listener, router, shutdown.clone())
        .await
        .context("ingress server error")?;

    shutdown.cancel();
    let _ = writer_handle.await;
    let _ = scheduler_handle.await;
    info!("netwatcher-controller shut down cleanly");
    Ok(())
}
