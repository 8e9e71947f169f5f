use crate::application::alerts::AlertQueue;
use crate::domain::errors::StorageWriteError;
use crate::domain::ports::RecordWriter;
use crate::domain::storage::PendingRecord;
use crate::infrastructure::observability::Metrics;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Consumer side of the record queue.
///
/// Writes run on a blocking thread so that fsync never stalls the runtime.
/// Once `hard_stop` is raised, queued records are discarded and counted
/// instead of written.
pub struct StorageStage {
    pub writer: Box<dyn RecordWriter>,
    pub alerts: Option<AlertQueue>,
    pub metrics: Metrics,
    pub hard_stop: watch::Receiver<bool>,
}

impl StorageStage {
    /// Runs until the queue closes. An exhausted write is returned as an
    /// error and stops the stage: records are never silently skipped.
    pub fn spawn(
        self,
        records: mpsc::Receiver<PendingRecord>,
    ) -> JoinHandle<Result<u64, StorageWriteError>> {
        tokio::task::spawn_blocking(move || self.run(records))
    }

    fn run(mut self, mut records: mpsc::Receiver<PendingRecord>) -> Result<u64, StorageWriteError> {
        let mut written = 0u64;
        let mut discarded = 0u64;

        while let Some(pending) = records.blocking_recv() {
            if *self.hard_stop.borrow() {
                discarded += 1;
                self.metrics.add_dropped_records("shutdown", 1);
                warn!(
                    "StorageStage: shutdown grace expired, record {} dropped",
                    pending.event.id
                );
                continue;
            }

            let id = pending.event.id.clone();
            match self.writer.append(pending) {
                Ok(record) => {
                    written += 1;
                    self.metrics.records_written_total.inc();
                    if let Some(alerts) = &self.alerts {
                        alerts.enqueue(&record);
                    }
                }
                Err(e) => {
                    self.metrics.add_dropped_records("storage_failure", 1);
                    error!("StorageStage: record {} could not be stored: {}", id, e);
                    records.close();
                    let abandoned = drain_abandoned(&mut records);
                    if abandoned > 0 {
                        self.metrics
                            .add_dropped_records("storage_failure", abandoned);
                        error!(
                            "StorageStage: {} queued record(s) abandoned after storage failure",
                            abandoned
                        );
                    }
                    if let Err(close_err) = self.writer.close() {
                        error!("StorageStage: close after failure also failed: {}", close_err);
                    }
                    return Err(e);
                }
            }
        }

        self.writer.close()?;
        info!(
            "StorageStage: finished ({} written, {} dropped at shutdown)",
            written, discarded
        );
        Ok(written)
    }
}

fn drain_abandoned(records: &mut mpsc::Receiver<PendingRecord>) -> u64 {
    let mut count = 0;
    while records.try_recv().is_ok() {
        count += 1;
    }
    count
}
