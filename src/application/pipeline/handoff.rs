use crate::application::market_data::snapshot_store::SnapshotStore;
use crate::domain::market::types::{FeedEvent, FeedSource, NormalizedTick};
use crate::domain::ports::EventSink;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Connector-side end of the pipeline.
///
/// Trades go onto an unbounded queue and are never dropped. Snapshots bypass
/// the queue and land directly in the [`SnapshotStore`], where a newer
/// snapshot supersedes an older one.
#[derive(Clone)]
pub struct FeedHandoff {
    source: FeedSource,
    ticks: UnboundedSender<NormalizedTick>,
    snapshots: Arc<SnapshotStore>,
    metrics: Metrics,
}

impl FeedHandoff {
    pub fn new(
        source: FeedSource,
        ticks: UnboundedSender<NormalizedTick>,
        snapshots: Arc<SnapshotStore>,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            ticks,
            snapshots,
            metrics,
        }
    }

    /// Same queues, labelled for another source.
    pub fn for_source(&self, source: FeedSource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }
}

impl EventSink for FeedHandoff {
    fn publish(&self, event: FeedEvent) {
        match event {
            FeedEvent::Tick(tick) => {
                self.metrics.inc_feed_event(self.source.as_str());
                if self.ticks.send(tick).is_err() {
                    // Only happens once the pipeline has stopped during shutdown
                    self.metrics.add_dropped_records("pipeline_closed", 1);
                    debug!("FeedHandoff: {} pipeline closed, tick discarded", self.source);
                }
            }
            FeedEvent::Snapshot(snapshot) => {
                self.metrics.inc_feed_event(self.source.as_str());
                let kind = snapshot.payload.kind();
                if !self.snapshots.apply(snapshot) {
                    debug!("FeedHandoff: {} {} snapshot superseded", self.source, kind);
                }
            }
            FeedEvent::Rejected(rejected) => {
                self.metrics.inc_feed_rejected(self.source.as_str());
                warn!(
                    "FeedHandoff: {} rejected input ({}): {}",
                    rejected.source, rejected.reason, rejected.raw
                );
            }
        }
    }
}
