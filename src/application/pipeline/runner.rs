use super::engine::DetectionPipeline;
use crate::domain::market::types::NormalizedTick;
use crate::domain::storage::PendingRecord;
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

/// Drives a [`DetectionPipeline`] from the tick queue and a close timer.
///
/// On shutdown the ticks already queued are still processed, candles whose
/// window has already ended are evaluated, in-progress candles are discarded
/// and the record sender is dropped so the storage stage can drain and finish.
/// Raising `hard_stop` ends the drain: every record that has not reached the
/// queue is counted as dropped.
pub async fn run_pipeline(
    mut pipeline: DetectionPipeline,
    mut ticks: mpsc::UnboundedReceiver<NormalizedTick>,
    records: mpsc::Sender<PendingRecord>,
    close_check: Duration,
    metrics: Metrics,
    mut shutdown: watch::Receiver<bool>,
    hard_stop: watch::Receiver<bool>,
) {
    let mut timer = interval_at(Instant::now() + close_check, close_check);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut out = RecordForwarder {
        records,
        metrics,
        hard_stop,
        stopped: None,
    };
    info!("Pipeline: started (close check every {:?})", close_check);

    while out.is_open() {
        tokio::select! {
            maybe_tick = ticks.recv() => {
                let Some(tick) = maybe_tick else {
                    info!("Pipeline: tick queue closed");
                    break;
                };
                if let Some(record) = pipeline.on_tick(&tick, now_ms()) {
                    out.forward(vec![record]).await;
                }
            }
            _ = timer.tick() => {
                let due = pipeline.on_timer(now_ms());
                out.forward(due).await;
            }
            _ = shutdown.changed() => {
                info!("Pipeline: shutdown requested, draining queued ticks");
                break;
            }
        }
    }

    let mut drained = 0usize;
    while out.is_open() {
        let Ok(tick) = ticks.try_recv() else {
            break;
        };
        drained += 1;
        if let Some(record) = pipeline.on_tick(&tick, now_ms()) {
            out.forward(vec![record]).await;
        }
    }
    let skipped = ticks.len();
    if skipped > 0 {
        warn!("Pipeline: {} queued tick(s) not processed", skipped);
    }

    // Windows that ended since the last timer tick are still complete candles
    let due = pipeline.on_timer(now_ms());
    out.forward(due).await;
    pipeline.shutdown();
    info!("Pipeline: stopped ({} queued ticks drained)", drained);
}

/// Sending side of the record queue.
///
/// The first failed send fixes the drop reason; everything forwarded after
/// that is counted under the same reason instead of being sent.
struct RecordForwarder {
    records: mpsc::Sender<PendingRecord>,
    metrics: Metrics,
    hard_stop: watch::Receiver<bool>,
    stopped: Option<&'static str>,
}

impl RecordForwarder {
    fn is_open(&self) -> bool {
        self.stopped.is_none()
    }

    async fn forward(&mut self, batch: Vec<PendingRecord>) {
        let mut batch = batch.into_iter();
        while let Some(record) = batch.next() {
            if let Some(reason) = self.stopped {
                let dropped = 1 + batch.len();
                self.metrics.add_dropped_records(reason, dropped as u64);
                warn!("Pipeline: {} record(s) dropped ({})", dropped, reason);
                return;
            }
            self.send(record).await;
        }
    }

    async fn send(&mut self, record: PendingRecord) {
        let id = record.event.id.clone();
        let outcome = tokio::select! {
            biased;
            _ = raised(&mut self.hard_stop) => Err("shutdown"),
            sent = self.records.send(record) => sent.map_err(|_| "storage_closed"),
        };
        if let Err(reason) = outcome {
            self.metrics.add_dropped_records(reason, 1);
            error!("Pipeline: record {} not written ({})", id, reason);
            self.stopped = Some(reason);
        }
    }
}

/// Resolves once the flag is `true`. A dropped sender never raises it.
async fn raised(flag: &mut watch::Receiver<bool>) {
    let seen = flag.wait_for(|stop| *stop).await.is_ok();
    if !seen {
        std::future::pending::<()>().await;
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
