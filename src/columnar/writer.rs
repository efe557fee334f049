//! Columnar Batch Writer (§4.3 "Write path (design)"): the single writer
//! owning the flush buffer, reading from a bounded queue and issuing
//! multi-row inserts within a bounded timeout.

use super::client::{ClickHouseClient, ClickHouseError};
use super::quoting::{quote_bool, quote_int, quote_string, quote_timestamp};
use crate::domain::{FlushBatchSize, FlushIntervalMs, FlushTimeoutMs, ProbeSample, WriterQueueCapacity};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Errors from the Batch Writer (§7 "Transient store").
#[derive(Error, Debug)]
pub enum WriterError {
    /// The writer's queue has been closed (the writer task has exited).
    #[error("writer queue closed")]
    QueueClosed,
    /// The underlying columnar store rejected or failed a flush.
    #[error("columnar insert failed: {0}")]
    Store(#[from] ClickHouseError),
}

/// Enqueues one assembled row for eventual insertion into `probe_data`
/// (§6 "Columnar tables"). Implementations may coalesce into batches
/// (steady state) or insert directly (test mode, §4.3 "If no writer is
/// installed").
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Enqueues `sample`. Blocks when the queue is full — the designed
    /// backpressure point (§4.3, §5 "Suspension points").
    ///
    /// # Errors
    ///
    /// Returns [`WriterError`] if the queue is closed or, for a
    /// direct-insert writer, if the store rejects the row.
    async fn enqueue(&self, sample: ProbeSample) -> Result<(), WriterError>;
}

fn render_insert(rows: &[ProbeSample]) -> String {
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            format!(
                "({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
                quote_int(i64::try_from(row.id.into_inner()).unwrap_or(i64::MAX)),
                quote_timestamp(row.created_at),
                quote_timestamp(row.received_at),
                quote_string(kind_str(row.kind)),
                quote_string(&row.probe_id.to_string()),
                quote_string(&row.probe_agent_id.to_string()),
                quote_string(&row.agent_id.to_string()),
                quote_bool(row.triggered),
                quote_string(&row.triggered_reason),
                quote_string(&row.target),
                row.target_agent
                    .map_or_else(|| quote_string(""), |a| quote_string(&a.to_string())),
                quote_string(&row.payload_raw),
            )
        })
        .collect();
    format!(
        "INSERT INTO probe_data (id, created_at, received_at, type, probe_id, probe_agent_id, \
         agent_id, triggered, triggered_reason, target, target_agent, payload_raw) VALUES {}",
        values.join(", ")
    )
}

fn kind_str(kind: crate::domain::ProbeKind) -> &'static str {
    use crate::domain::ProbeKind;
    match kind {
        ProbeKind::Ping => "PING",
        ProbeKind::Mtr => "MTR",
        ProbeKind::Rperf => "RPERF",
        ProbeKind::Speedtest => "SPEEDTEST",
        ProbeKind::NetInfo => "NETINFO",
        ProbeKind::SysInfo => "SYSINFO",
        ProbeKind::TrafficSim => "TRAFFICSIM",
        ProbeKind::Agent => "AGENT",
    }
}

/// Single-row fallback writer for test mode (§4.3 "If no writer is
/// installed (test mode), each sample falls back to a direct single-row
/// insert").
pub struct DirectInsertWriter {
    client: std::sync::Arc<ClickHouseClient>,
}

impl DirectInsertWriter {
    /// Wraps a columnar client for direct, unbatched inserts.
    #[must_use]
    pub fn new(client: std::sync::Arc<ClickHouseClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchWriter for DirectInsertWriter {
    async fn enqueue(&self, sample: ProbeSample) -> Result<(), WriterError> {
        let sql = render_insert(std::slice::from_ref(&sample));
        self.client.execute(&sql).await?;
        Ok(())
    }
}

/// Bounded-queue, size/time-threshold batch writer: the steady-state
/// writer (§4.3, §5 "One batch writer activity, exclusive owner of the
/// flush buffer").
pub struct ColumnarBatchWriter {
    sender: mpsc::Sender<ProbeSample>,
}

impl ColumnarBatchWriter {
    /// Spawns the writer's background flush task and returns a handle
    /// implementing [`BatchWriter`] plus the task's `JoinHandle`.
    ///
    /// The task drains the queue and flushes on `cancellation`
    /// (§5 "the writer drains then closes").
    pub fn spawn(
        client: std::sync::Arc<ClickHouseClient>,
        queue_capacity: WriterQueueCapacity,
        batch_size: FlushBatchSize,
        flush_interval: FlushIntervalMs,
        flush_timeout: FlushTimeoutMs,
        cancellation: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.as_usize());
        let handle = tokio::spawn(run_flush_loop(
            receiver,
            client,
            batch_size,
            flush_interval,
            flush_timeout,
            cancellation,
        ));
        (Self { sender }, handle)
    }
}

#[async_trait]
impl BatchWriter for ColumnarBatchWriter {
    async fn enqueue(&self, sample: ProbeSample) -> Result<(), WriterError> {
        self.sender
            .send(sample)
            .await
            .map_err(|_| WriterError::QueueClosed)
    }
}

async fn run_flush_loop(
    mut receiver: mpsc::Receiver<ProbeSample>,
    client: std::sync::Arc<ClickHouseClient>,
    batch_size: FlushBatchSize,
    flush_interval: FlushIntervalMs,
    flush_timeout: FlushTimeoutMs,
    cancellation: CancellationToken,
) {
    let mut buffer: Vec<ProbeSample> = Vec::with_capacity(batch_size.as_usize());
    let mut ticker = tokio::time::interval(flush_interval.as_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancellation.cancelled() => {
                drain_remaining(&mut receiver, &mut buffer);
                flush(&client, &mut buffer, flush_timeout).await;
                info!("batch writer drained and shut down");
                return;
            }
            maybe_sample = receiver.recv() => {
                match maybe_sample {
                    Some(sample) => {
                        buffer.push(sample);
                        if buffer.len() >= batch_size.as_usize() {
                            flush(&client, &mut buffer, flush_timeout).await;
                        }
                    }
                    None => {
                        flush(&client, &mut buffer, flush_timeout).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&client, &mut buffer, flush_timeout).await;
                }
            }
        }
    }
}

fn drain_remaining(receiver: &mut mpsc::Receiver<ProbeSample>, buffer: &mut Vec<ProbeSample>) {
    while let Ok(sample) = receiver.try_recv() {
        buffer.push(sample);
    }
}

#[instrument(skip(client, buffer), fields(batch_len = buffer.len()))]
async fn flush(
    client: &std::sync::Arc<ClickHouseClient>,
    buffer: &mut Vec<ProbeSample>,
    flush_timeout: FlushTimeoutMs,
) {
    if buffer.is_empty() {
        return;
    }
    let sql = render_insert(buffer);
    let result = tokio::time::timeout(flush_timeout.as_duration(), client.execute(&sql)).await;
    match result {
        Ok(Ok(())) => info!(rows = buffer.len(), "flushed batch to columnar store"),
        Ok(Err(e)) => warn!(error = %e, rows = buffer.len(), "flush failed, dropping batch"),
        Err(_) => warn!(rows = buffer.len(), "flush timed out, dropping batch"),
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentId, ProbeId, ProbeKind, SampleId};
    use chrono::Utc;

    fn sample() -> ProbeSample {
        ProbeSample {
            id: SampleId::generate(),
            created_at: Utc::now(),
            received_at: Utc::now(),
            kind: ProbeKind::Ping,
            probe_id: ProbeId::generate(),
            probe_agent_id: AgentId::generate(),
            agent_id: AgentId::generate(),
            triggered: false,
            triggered_reason: String::new(),
            target: "1.1.1.1".to_string(),
            target_agent: None,
            payload_raw: "{}".to_string(),
            _marker: None,
        }
    }

    #[test]
    fn render_insert_escapes_target_with_quote() {
        let mut row = sample();
        row.target = "o'malley".to_string();
        let sql = render_insert(&[row]);
        assert!(sql.contains("'o''malley'"));
    }

    #[test]
    fn render_insert_joins_multiple_rows() {
        let sql = render_insert(&[sample(), sample()]);
        assert_eq!(sql.matches("INSERT INTO").count(), 1);
        assert_eq!(sql.matches("PING").count(), 2);
    }
}
