use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::errors::{AlertError, StorageWriteError};
use crate::domain::market::types::{FeedEvent, FeedSource};
use crate::domain::storage::{AlertSummary, PendingRecord, StorageRecord};

/// Non-blocking handoff from a connector into the pipeline.
///
/// Trades must never be dropped here; snapshots may be superseded by a newer
/// one for the same (symbol, kind).
pub trait EventSink: Send + Sync {
    fn publish(&self, event: FeedEvent);
}

/// One external source: owns its connection lifecycle and reconnection.
#[async_trait]
pub trait FeedConnector: Send {
    fn source(&self) -> FeedSource;

    /// Runs until `shutdown` flips to `true`. Transient failures are retried
    /// internally and never returned.
    async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<()>;
}

/// Durable, single-writer append log.
///
/// Blocking by nature (write + fsync); callers drive it from a dedicated thread.
pub trait RecordWriter: Send {
    /// Assigns the next sequence id and returns once the record is durable.
    fn append(&mut self, record: PendingRecord) -> Result<StorageRecord, StorageWriteError>;

    /// Seals the active segment, if any.
    fn close(&mut self) -> Result<(), StorageWriteError>;
}

/// Downstream notification target for durably stored records.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, summary: &AlertSummary) -> Result<(), AlertError>;
}
