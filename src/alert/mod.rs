//! Alert Pipeline (§4.5): rule evaluation against samples and analysis
//! cycles, single-active-alert-per-rule deduplication, and fire-and-forget
//! notification dispatch.

pub mod bridge;
pub mod store;
pub mod webhook;

pub use bridge::{evaluate_analysis_alerts, evaluate_sample_alerts, SampleContext};
pub use store::{AlertStore, SqliteAlertStore};
pub use webhook::{dispatch_webhook, WebhookError, WebhookPayload};

use thiserror::Error;

/// Errors surfaced by the Alert Pipeline (§7 "External notify" is logged,
/// not propagated here; this enum covers the evaluation/persistence path).
#[derive(Error, Debug)]
pub enum AlertError {
    /// The relational store failed to load rules or persist an alert.
    #[error("alert store error: {0}")]
    Store(#[from] sqlx::Error),
    /// A stored `channels_json` or rule column failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// A stored id column did not parse as a UUID.
    #[error("invalid id column: {0}")]
    InvalidInput(String),
}
