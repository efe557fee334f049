//! The Columnar Batch Writer component (§4.3): buffered writes to the
//! append-only `probe_data` table, plus the read paths and time-bucket
//! aggregation layered on top of it.

pub mod aggregate;
pub mod client;
pub mod query;
pub mod quoting;
pub mod snapshots;
pub mod writer;

pub use aggregate::{
    AggregatedMtrTrace, FusedHop, MtrAggregateItem, NotableMtrTrace, OtherBucket, PingBucket,
    TrafficSimBucket,
};
pub use client::{ClickHouseClient, ClickHouseConfig, ClickHouseError};
pub use query::{FinderFilter, ProbeDataRow, QueryError};
pub use snapshots::{fetch_snapshot_history, insert_snapshot, SnapshotError};
pub use writer::{BatchWriter, ColumnarBatchWriter, DirectInsertWriter, WriterError};
