//! HTTP client for the columnar store, reached over ClickHouse's native
//! HTTP interface rather than a driver crate (§4.3, §9 "SQL literal
//! safety": every predicate is an inline literal, so no parameter-binding
//! layer is needed; `reqwest` is already in the dependency surface for
//! webhook dispatch and is reused here).

use crate::domain::ColumnarStatementTimeoutSecs;
use reqwest::Client;
use thiserror::Error;
use tracing::instrument;

/// Errors from a columnar HTTP round-trip.
#[derive(Error, Debug)]
pub enum ClickHouseError {
    /// The HTTP request itself failed (connect, timeout, transport).
    #[error("columnar request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server responded with a non-2xx status.
    #[error("columnar server returned {status}: {body}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Connection settings for the columnar HTTP interface (§6 "Environment
/// variables consumed by the core").
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// Host, from `CLICKHOUSE_HOST`.
    pub host: String,
    /// Port, from `CLICKHOUSE_PORT`.
    pub port: u16,
    /// User, from `CLICKHOUSE_USER`.
    pub user: String,
    /// Password, from `CLICKHOUSE_PASSWORD`.
    pub password: String,
    /// Database name, from `CLICKHOUSE_DB`.
    pub database: String,
    /// Per-statement timeout (§5, server setting, default 60s).
    pub statement_timeout: ColumnarStatementTimeoutSecs,
}

impl ClickHouseConfig {
    fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Thin HTTP client issuing raw SQL statements against ClickHouse.
pub struct ClickHouseClient {
    http: Client,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    /// Builds a client from connection settings, applying the per-statement
    /// timeout to the underlying HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the `reqwest` client cannot be constructed.
    pub fn new(config: ClickHouseConfig) -> Result<Self, ClickHouseError> {
        let http = Client::builder()
            .timeout(config.statement_timeout.as_duration())
            .build()?;
        Ok(Self { http, config })
    }

    /// Executes a statement with no expected result body (`INSERT`, `DDL`).
    ///
    /// # Errors
    ///
    /// Returns [`ClickHouseError`] on transport failure or a non-2xx
    /// response.
    #[instrument(skip(self, sql), err)]
    pub async fn execute(&self, sql: &str) -> Result<(), ClickHouseError> {
        self.post(sql).await?;
        Ok(())
    }

    /// Executes a `SELECT ... FORMAT JSONEachRow` statement and returns the
    /// raw response body for the caller to deserialize line-by-line.
    ///
    /// # Errors
    ///
    /// Returns [`ClickHouseError`] on transport failure or a non-2xx
    /// response.
    #[instrument(skip(self, sql), err)]
    pub async fn query(&self, sql: &str) -> Result<String, ClickHouseError> {
        self.post(sql).await
    }

    async fn post(&self, sql: &str) -> Result<String, ClickHouseError> {
        let response = self
            .http
            .post(self.config.base_url())
            .query(&[
                ("database", self.config.database.as_str()),
                ("user", self.config.user.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .body(sql.to_string())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClickHouseError::ServerError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
