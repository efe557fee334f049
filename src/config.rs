//! Start-up configuration: CLI flags with environment-variable fallbacks
//! (§6 "Environment variables consumed by the core"), built on
//! `clap::Parser` plus the nutype-backed tunables already defined in
//! [`crate::domain::config_types`].

use crate::domain::{
    AggregationRowCap, AnalysisIntervalSecs, ColumnarStatementTimeoutSecs, ConnectionPoolSize,
    FlushBatchSize, FlushIntervalMs, FlushTimeoutMs, FreshnessWindowSecs, RetentionDays,
    WebhookTimeoutMs, WriterQueueCapacity,
};
use clap::Parser;

/// Controller start-up flags. Every flag has an environment-variable
/// fallback; flags named directly in §6 use exactly that variable name.
#[derive(Parser, Debug)]
#[command(name = "netwatcher-controller", version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// ClickHouse host (§6 `CLICKHOUSE_HOST`).
    #[arg(long, env = "CLICKHOUSE_HOST", default_value = "localhost")]
    pub clickhouse_host: String,

    /// ClickHouse HTTP port (§6 `CLICKHOUSE_PORT`).
    #[arg(long, env = "CLICKHOUSE_PORT", default_value_t = 8123)]
    pub clickhouse_port: u16,

    /// ClickHouse user (§6 `CLICKHOUSE_USER`).
    #[arg(long, env = "CLICKHOUSE_USER", default_value = "default")]
    pub clickhouse_user: String,

    /// ClickHouse password (§6 `CLICKHOUSE_PASSWORD`).
    #[arg(long, env = "CLICKHOUSE_PASSWORD", default_value = "")]
    pub clickhouse_password: String,

    /// ClickHouse database name (§6 `CLICKHOUSE_DB`).
    #[arg(long, env = "CLICKHOUSE_DB", default_value = "netwatcher")]
    pub clickhouse_db: String,

    /// Analysis cycle interval in seconds (§6 `ANALYSIS_INTERVAL`, default 300).
    #[arg(long, env = "ANALYSIS_INTERVAL", default_value_t = 300)]
    pub analysis_interval_secs: u64,

    /// Path to the relational (`SQLite`) database file.
    #[arg(long, env = "NETWATCHER_DB_PATH", default_value = "netwatcher.db")]
    pub db_path: String,

    /// Relational connection pool size.
    #[arg(long, env = "NETWATCHER_DB_POOL_SIZE", default_value_t = 5)]
    pub db_pool_size: usize,

    /// Address the ingress+query HTTP surface binds to.
    #[arg(long, env = "NETWATCHER_BIND_ADDR", default_value = "0.0.0.0:8090")]
    pub bind_addr: String,

    /// Columnar batch writer in-memory queue capacity (§4.3, default 2000).
    #[arg(long, env = "NETWATCHER_WRITER_QUEUE_CAPACITY", default_value_t = 2000)]
    pub writer_queue_capacity: usize,

    /// Flush batch size threshold (§4.3, default 50).
    #[arg(long, env = "NETWATCHER_FLUSH_BATCH_SIZE", default_value_t = 50)]
    pub flush_batch_size: usize,

    /// Flush time threshold in milliseconds (§4.3, default 2000).
    #[arg(long, env = "NETWATCHER_FLUSH_INTERVAL_MS", default_value_t = 2_000)]
    pub flush_interval_ms: u64,

    /// Per-flush statement timeout in milliseconds (§4.3, default 10000).
    #[arg(long, env = "NETWATCHER_FLUSH_TIMEOUT_MS", default_value_t = 10_000)]
    pub flush_timeout_ms: u64,

    /// Columnar per-statement timeout in seconds (§5, default 60).
    #[arg(long, env = "NETWATCHER_COLUMNAR_STATEMENT_TIMEOUT_SECS", default_value_t = 60)]
    pub columnar_statement_timeout_secs: u64,

    /// Raw-row aggregation hard cap (§4.3, default 50000).
    #[arg(long, env = "NETWATCHER_AGGREGATION_ROW_CAP", default_value_t = 50_000)]
    pub aggregation_row_cap: usize,

    /// `probe_data`/snapshot retention window in days (§3, default 90).
    #[arg(long, env = "NETWATCHER_RETENTION_DAYS", default_value_t = 90)]
    pub retention_days: u32,

    /// Agent heartbeat freshness window in seconds (§3, default 60).
    #[arg(long, env = "NETWATCHER_FRESHNESS_SECS", default_value_t = 60)]
    pub freshness_secs: u64,

    /// Webhook dispatch timeout in milliseconds (§4.5, default 10000).
    #[arg(long, env = "NETWATCHER_WEBHOOK_TIMEOUT_MS", default_value_t = 10_000)]
    pub webhook_timeout_ms: u64,

    /// Default lookback window in seconds for on-demand range/analysis
    /// queries when the caller doesn't supply one (default 3600).
    #[arg(long, env = "NETWATCHER_DEFAULT_WINDOW_SECS", default_value_t = 3_600)]
    pub default_window_secs: u64,
}

/// A parse error for one of the bounded nutype configuration values.
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration value for {field}: {value}")]
pub struct ConfigValueError {
    field: &'static str,
    value: String,
}

impl Args {
    /// Validates and narrows every bounded flag into its nutype, failing
    /// fast at start-up rather than deep inside a request handler.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] if any flag falls outside its
    /// documented valid range (§6 "Defaults are documented here").
    pub fn writer_queue_capacity(&self) -> Result<WriterQueueCapacity, ConfigValueError> {
        WriterQueueCapacity::try_new(self.writer_queue_capacity).map_err(|_| ConfigValueError {
            field: "writer_queue_capacity",
            value: self.writer_queue_capacity.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn flush_batch_size(&self) -> Result<FlushBatchSize, ConfigValueError> {
        FlushBatchSize::try_new(self.flush_batch_size).map_err(|_| ConfigValueError {
            field: "flush_batch_size",
            value: self.flush_batch_size.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn flush_interval_ms(&self) -> Result<FlushIntervalMs, ConfigValueError> {
        FlushIntervalMs::try_new(self.flush_interval_ms).map_err(|_| ConfigValueError {
            field: "flush_interval_ms",
            value: self.flush_interval_ms.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn flush_timeout_ms(&self) -> Result<FlushTimeoutMs, ConfigValueError> {
        FlushTimeoutMs::try_new(self.flush_timeout_ms).map_err(|_| ConfigValueError {
            field: "flush_timeout_ms",
            value: self.flush_timeout_ms.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn columnar_statement_timeout(&self) -> Result<ColumnarStatementTimeoutSecs, ConfigValueError> {
        ColumnarStatementTimeoutSecs::try_new(self.columnar_statement_timeout_secs).map_err(|_| ConfigValueError {
            field: "columnar_statement_timeout_secs",
            value: self.columnar_statement_timeout_secs.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn aggregation_row_cap(&self) -> Result<AggregationRowCap, ConfigValueError> {
        AggregationRowCap::try_new(self.aggregation_row_cap).map_err(|_| ConfigValueError {
            field: "aggregation_row_cap",
            value: self.aggregation_row_cap.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn retention_days(&self) -> Result<RetentionDays, ConfigValueError> {
        RetentionDays::try_new(self.retention_days).map_err(|_| ConfigValueError {
            field: "retention_days",
            value: self.retention_days.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn freshness_window(&self) -> Result<FreshnessWindowSecs, ConfigValueError> {
        FreshnessWindowSecs::try_new(self.freshness_secs).map_err(|_| ConfigValueError {
            field: "freshness_secs",
            value: self.freshness_secs.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn webhook_timeout(&self) -> Result<WebhookTimeoutMs, ConfigValueError> {
        WebhookTimeoutMs::try_new(self.webhook_timeout_ms).map_err(|_| ConfigValueError {
            field: "webhook_timeout_ms",
            value: self.webhook_timeout_ms.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn analysis_interval(&self) -> Result<AnalysisIntervalSecs, ConfigValueError> {
        AnalysisIntervalSecs::try_new(self.analysis_interval_secs).map_err(|_| ConfigValueError {
            field: "analysis_interval_secs",
            value: self.analysis_interval_secs.to_string(),
        })
    }

    /// See [`Args::writer_queue_capacity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValueError`] on an out-of-range value.
    pub fn db_pool_size(&self) -> Result<ConnectionPoolSize, ConfigValueError> {
        ConnectionPoolSize::try_new(self.db_pool_size).map_err(|_| ConfigValueError {
            field: "db_pool_size",
            value: self.db_pool_size.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::parse_from(["netwatcher-controller"]);
        assert_eq!(args.analysis_interval_secs, 300);
        assert_eq!(args.writer_queue_capacity, 2000);
        assert_eq!(args.flush_batch_size, 50);
        assert_eq!(args.flush_interval_ms, 2_000);
        assert_eq!(args.flush_timeout_ms, 10_000);
        assert_eq!(args.aggregation_row_cap, 50_000);
        assert_eq!(args.retention_days, 90);
        assert_eq!(args.freshness_secs, 60);
        assert_eq!(args.webhook_timeout_ms, 10_000);
    }

    #[test]
    fn env_override_wins_over_default() {
        // SAFETY: test runs single-threaded within this process's test harness slot.
        unsafe {
            std::env::set_var("CLICKHOUSE_HOST", "clickhouse.internal");
        }
        let args = Args::parse_from(["netwatcher-controller"]);
        assert_eq!(args.clickhouse_host, "clickhouse.internal");
        unsafe {
            std::env::remove_var("CLICKHOUSE_HOST");
        }
    }

    #[test]
    fn out_of_range_writer_queue_capacity_is_rejected() {
        let mut args = Args::parse_from(["netwatcher-controller"]);
        args.writer_queue_capacity = 0;
        assert!(args.writer_queue_capacity().is_err());
    }
}
