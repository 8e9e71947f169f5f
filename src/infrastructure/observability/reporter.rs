//! Push-based status reporter
//!
//! Periodically prints a JSON snapshot of the engine counters to stdout.
//! Nothing listens for inbound requests.

use crate::infrastructure::observability::metrics::Metrics;
use prometheus::CounterVec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

const FEED_SOURCES: &[&str] = &["okx_trades", "okx_orderbook", "coinalyze", "coingecko", "whale_alert"];
const REJECT_REASONS: &[&str] = &["non_positive_price", "negative_size", "unknown_symbol", "out_of_order"];
const STALE_INPUTS: &[&str] = &["orderbook", "derivatives", "macro", "whale", "vwap"];
const DROP_REASONS: &[&str] = &["shutdown", "storage_failure", "storage_closed", "pipeline_closed"];
const ALERT_OUTCOMES: &[&str] = &["delivered", "suppressed", "failed", "queue_full", "closed"];

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub feeds: Vec<FeedSnapshot>,
    pub pipeline: PipelineSnapshot,
    pub storage: StorageSnapshot,
    pub alerts: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct FeedSnapshot {
    pub source: String,
    pub events: f64,
    pub rejected: f64,
    pub reconnects: f64,
}

#[derive(Debug, Serialize)]
pub struct PipelineSnapshot {
    pub ticks_rejected: BTreeMap<String, f64>,
    pub late_trades_applied: f64,
    pub late_trades_dropped: f64,
    pub candles_closed: BTreeMap<String, f64>,
    pub wicks_detected: BTreeMap<String, f64>,
    pub stale_inputs: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct StorageSnapshot {
    pub records_written: f64,
    pub records_dropped: BTreeMap<String, f64>,
    pub write_retries: f64,
}

fn by_label(counter: &CounterVec, labels: &[&str]) -> BTreeMap<String, f64> {
    labels
        .iter()
        .map(|label| (label.to_string(), Metrics::counter_value(counter, label)))
        .collect()
}

/// Push-based metrics reporter
///
/// Outputs metrics as structured JSON lines on a configurable interval.
pub struct MetricsReporter {
    metrics: Metrics,
    symbols: Vec<String>,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, symbols: Vec<String>, interval_seconds: u64) -> Self {
        Self {
            metrics,
            symbols,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run the reporter until shutdown, printing a final snapshot on the way out
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => self.emit(),
                _ = shutdown.changed() => {
                    self.emit();
                    break;
                }
            }
        }
    }

    fn emit(&self) {
        let snapshot = self.collect_snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                // Special prefix so the line can be filtered out of the log stream
                println!("METRICS_JSON:{}", json);
                info!(
                    "Status: {} written | {} dropped | {} wicks | Uptime: {}s",
                    snapshot.storage.records_written,
                    snapshot.storage.records_dropped.values().sum::<f64>(),
                    snapshot.pipeline.wicks_detected.values().sum::<f64>(),
                    snapshot.uptime_seconds
                );
            }
            Err(e) => warn!("MetricsReporter: Failed to serialize metrics: {}", e),
        }
    }

    fn collect_snapshot(&self) -> MetricsSnapshot {
        let m = &self.metrics;
        let uptime = self.start_time.elapsed().as_secs();
        m.uptime_seconds.set(uptime as f64);

        let feeds = FEED_SOURCES
            .iter()
            .map(|source| FeedSnapshot {
                source: source.to_string(),
                events: Metrics::counter_value(&m.feed_events_total, source),
                rejected: Metrics::counter_value(&m.feed_rejected_messages_total, source),
                reconnects: Metrics::counter_value(&m.feed_reconnects_total, source),
            })
            .collect();

        let symbols: Vec<&str> = self.symbols.iter().map(String::as_str).collect();
        let wicks_detected = self
            .symbols
            .iter()
            .map(|symbol| {
                let count: f64 = ["upper", "lower"]
                    .iter()
                    .map(|d| m.wicks_detected_total.with_label_values(&[symbol.as_str(), *d]).get())
                    .sum();
                (symbol.clone(), count)
            })
            .collect();

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            feeds,
            pipeline: PipelineSnapshot {
                ticks_rejected: by_label(&m.ticks_rejected_total, REJECT_REASONS),
                late_trades_applied: Metrics::counter_value(&m.late_trades_total, "applied"),
                late_trades_dropped: Metrics::counter_value(&m.late_trades_total, "dropped"),
                candles_closed: by_label(&m.candles_closed_total, &symbols),
                wicks_detected,
                stale_inputs: by_label(&m.stale_inputs_total, STALE_INPUTS),
            },
            storage: StorageSnapshot {
                records_written: m.records_written_total.get(),
                records_dropped: by_label(&m.records_dropped_total, DROP_REASONS),
                write_retries: m.storage_retries_total.get(),
            },
            alerts: by_label(&m.alerts_total, ALERT_OUTCOMES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_rejected_tick("out_of_order");
        metrics.inc_wicks("BTC-USDT", "upper");
        metrics.inc_wicks("BTC-USDT", "lower");
        metrics.inc_reconnects("okx_trades");
        metrics.add_dropped_records("shutdown", 2);
        metrics.records_written_total.inc();

        let reporter = MetricsReporter::new(metrics, vec!["BTC-USDT".to_string()], 60);
        let snapshot = reporter.collect_snapshot();

        assert_eq!(snapshot.pipeline.ticks_rejected["out_of_order"], 1.0);
        assert_eq!(snapshot.pipeline.wicks_detected["BTC-USDT"], 2.0);
        assert_eq!(snapshot.storage.records_dropped["shutdown"], 2.0);
        assert_eq!(snapshot.storage.records_written, 1.0);
        let okx = snapshot.feeds.iter().find(|f| f.source == "okx_trades").unwrap();
        assert_eq!(okx.reconnects, 1.0);
        assert!(!snapshot.timestamp.is_empty());
    }

    #[test]
    fn test_snapshot_serialization() {
        let reporter = MetricsReporter::new(Metrics::new().unwrap(), vec!["SOL-USDT".to_string()], 60);
        let json = serde_json::to_string(&reporter.collect_snapshot()).expect("Failed to serialize");
        assert!(json.contains("\"SOL-USDT\""));
        assert!(json.contains("records_written"));
    }
}
