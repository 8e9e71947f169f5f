use crate::domain::ports::AlertSink;
use crate::domain::storage::{AlertSummary, StorageRecord};
use crate::domain::wick::WickDirection;
use crate::infrastructure::feeds::ReconnectPolicy;
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Storage-side handle: never blocks, drops the alert when the queue is full.
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<AlertSummary>,
    top_n: usize,
    metrics: Metrics,
}

impl AlertQueue {
    pub fn new(tx: mpsc::Sender<AlertSummary>, top_n: usize, metrics: Metrics) -> Self {
        Self { tx, top_n, metrics }
    }

    pub fn enqueue(&self, record: &StorageRecord) {
        let summary = AlertSummary::from_record(record, self.top_n);
        match self.tx.try_send(summary) {
            Ok(()) => {}
            Err(TrySendError::Full(summary)) => {
                self.metrics.inc_alerts("queue_full");
                warn!(
                    "AlertQueue: queue full, alert for {} #{} dropped",
                    summary.symbol, summary.sequence_id
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.inc_alerts("closed");
                debug!("AlertQueue: dispatcher stopped, alert dropped");
            }
        }
    }
}

/// Delivers summaries to the sink with a per-(symbol, direction) cooldown and
/// bounded retries.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    cooldown_ms: i64,
    policy: ReconnectPolicy,
    max_attempts: u32,
    last_sent: HashMap<(String, WickDirection), i64>,
    metrics: Metrics,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, cooldown: Duration, metrics: Metrics) -> Self {
        Self {
            sink,
            cooldown_ms: cooldown.as_millis() as i64,
            policy: ReconnectPolicy::default(),
            max_attempts: 3,
            last_sent: HashMap::new(),
            metrics,
        }
    }

    pub fn with_retry(mut self, policy: ReconnectPolicy, max_attempts: u32) -> Self {
        self.policy = policy;
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn cooling_down(&self, summary: &AlertSummary, now_ms: i64) -> bool {
        self.last_sent
            .get(&(summary.symbol.clone(), summary.direction))
            .is_some_and(|last| now_ms - last < self.cooldown_ms)
    }

    /// Returns `true` when the alert was delivered.
    pub async fn dispatch(&mut self, summary: &AlertSummary, now_ms: i64) -> bool {
        if self.cooling_down(summary, now_ms) {
            self.metrics.inc_alerts("suppressed");
            debug!(
                "AlertDispatcher: {} {} in cooldown, alert suppressed",
                summary.symbol, summary.direction
            );
            return false;
        }

        for attempt in 1..=self.max_attempts {
            match self.sink.deliver(summary).await {
                Ok(()) => {
                    self.last_sent
                        .insert((summary.symbol.clone(), summary.direction), now_ms);
                    self.metrics.inc_alerts("delivered");
                    info!(
                        "AlertDispatcher: {} {} wick #{} delivered",
                        summary.symbol, summary.direction, summary.sequence_id
                    );
                    return true;
                }
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        "AlertDispatcher: attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        "AlertDispatcher: giving up on {} #{} after {} attempts: {}",
                        summary.symbol, summary.sequence_id, attempt, e
                    );
                }
            }
        }
        self.metrics.inc_alerts("failed");
        false
    }

    /// Consumes the queue until it closes or shutdown is signalled.
    pub async fn run(mut self, mut queue: mpsc::Receiver<AlertSummary>, mut shutdown: watch::Receiver<bool>) {
        info!("AlertDispatcher: started");
        loop {
            tokio::select! {
                maybe = queue.recv() => {
                    let Some(summary) = maybe else { break };
                    self.dispatch(&summary, Utc::now().timestamp_millis()).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("AlertDispatcher: stopped");
    }
}
