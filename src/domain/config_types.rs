//! Bounded configuration newtypes for the batch writer and columnar store.
//!
//! Every tunable that has a documented default and a sane range gets its
//! own type instead of a bare `usize`/`u64` threaded through function
//! signatures.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// In-memory queue capacity for the columnar batch writer (§4.3, default 2000).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 2000
)]
pub struct WriterQueueCapacity(usize);

impl WriterQueueCapacity {
    /// Returns the capacity as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Flush batch size threshold (§4.3, default 50).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 50
)]
pub struct FlushBatchSize(usize);

impl FlushBatchSize {
    /// Returns the size as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Flush time threshold in milliseconds (§4.3, default 2 s).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 2000
)]
pub struct FlushIntervalMs(u64);

impl FlushIntervalMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Per-flush statement timeout in milliseconds (§4.3, default 10 s).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 10_000
)]
pub struct FlushTimeoutMs(u64);

impl FlushTimeoutMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Raw-row aggregation hard cap (§4.3, default 50 000).
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 50_000
)]
pub struct AggregationRowCap(usize);

impl AggregationRowCap {
    /// Returns the cap as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Columnar retention window in days (§3, default 90).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3650),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 90
)]
pub struct RetentionDays(u32);

impl RetentionDays {
    /// Returns the value as `u32`.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Agent heartbeat freshness window in seconds (§3, default 60 s).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 60
)]
pub struct FreshnessWindowSecs(u64);

impl FreshnessWindowSecs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

/// Analysis cycle interval in seconds (§5/§6, default 300, env `ANALYSIS_INTERVAL`).
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 300
)]
pub struct AnalysisIntervalSecs(u64);

impl AnalysisIntervalSecs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

/// Relational (`SQLite`) connection pool size.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 5
)]
pub struct ConnectionPoolSize(usize);

impl ConnectionPoolSize {
    /// Returns the size as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Webhook dispatch timeout in milliseconds (§4.5, default 10 s).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 10_000
)]
pub struct WebhookTimeoutMs(u64);

impl WebhookTimeoutMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Columnar per-statement timeout in seconds (§5, server setting, default 60).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3600),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 60
)]
pub struct ColumnarStatementTimeoutSecs(u64);

impl ColumnarStatementTimeoutSecs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}
