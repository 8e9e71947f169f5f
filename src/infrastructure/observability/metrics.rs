//! Prometheus metrics definitions for the wick engine
//!
//! All metrics use the `wickengine_` prefix. Every dropped record and every
//! reconnect is counted here so that losses are externally observable.

use prometheus::{
    Counter, CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for the wick engine
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Ticks refused by the validator, by reason
    pub ticks_rejected_total: CounterVec,
    /// Trades older than the open window, by outcome (applied, dropped)
    pub late_trades_total: CounterVec,
    /// Connection or poll failures followed by a backoff, by source
    pub feed_reconnects_total: CounterVec,
    /// Raw messages that could not be normalized, by source
    pub feed_rejected_messages_total: CounterVec,
    /// Normalized events published, by source
    pub feed_events_total: CounterVec,
    /// Closed candles, by symbol
    pub candles_closed_total: CounterVec,
    /// Emitted wick events, by symbol and direction
    pub wicks_detected_total: CounterVec,
    /// Context inputs that fell back to the sentinel, by input
    pub stale_inputs_total: CounterVec,
    /// Records durably written
    pub records_written_total: Counter,
    /// Records lost before reaching storage, by reason
    pub records_dropped_total: CounterVec,
    /// Alert deliveries, by outcome
    pub alerts_total: CounterVec,
    /// Write attempts that had to be retried
    pub storage_retries_total: Counter,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> anyhow::Result<CounterVec> {
    let counter = CounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_rejected_total = counter_vec(
            &registry,
            "wickengine_ticks_rejected_total",
            "Ticks rejected by the validator",
            &["reason"],
        )?;
        let late_trades_total = counter_vec(
            &registry,
            "wickengine_late_trades_total",
            "Trades arriving after their window moved on",
            &["outcome"],
        )?;
        let feed_reconnects_total = counter_vec(
            &registry,
            "wickengine_feed_reconnects_total",
            "Feed reconnection attempts",
            &["source"],
        )?;
        let feed_rejected_messages_total = counter_vec(
            &registry,
            "wickengine_feed_rejected_messages_total",
            "Feed messages that could not be normalized",
            &["source"],
        )?;
        let feed_events_total = counter_vec(
            &registry,
            "wickengine_feed_events_total",
            "Normalized events published by feeds",
            &["source"],
        )?;
        let candles_closed_total = counter_vec(
            &registry,
            "wickengine_candles_closed_total",
            "Closed candles",
            &["symbol"],
        )?;
        let wicks_detected_total = counter_vec(
            &registry,
            "wickengine_wicks_detected_total",
            "Wick events emitted",
            &["symbol", "direction"],
        )?;
        let stale_inputs_total = counter_vec(
            &registry,
            "wickengine_stale_inputs_total",
            "Feature inputs missing or older than their staleness bound",
            &["input"],
        )?;
        let records_dropped_total = counter_vec(
            &registry,
            "wickengine_records_dropped_total",
            "Records dropped before durable storage",
            &["reason"],
        )?;
        let alerts_total = counter_vec(
            &registry,
            "wickengine_alerts_total",
            "Alert deliveries by outcome",
            &["outcome"],
        )?;

        let records_written_total = Counter::with_opts(Opts::new(
            "wickengine_records_written_total",
            "Records durably written",
        ))?;
        registry.register(Box::new(records_written_total.clone()))?;

        let storage_retries_total = Counter::with_opts(Opts::new(
            "wickengine_storage_retries_total",
            "Storage write retries",
        ))?;
        registry.register(Box::new(storage_retries_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "wickengine_uptime_seconds",
            "Engine uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ticks_rejected_total,
            late_trades_total,
            feed_reconnects_total,
            feed_rejected_messages_total,
            feed_events_total,
            candles_closed_total,
            wicks_detected_total,
            stale_inputs_total,
            records_written_total,
            records_dropped_total,
            alerts_total,
            storage_retries_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_rejected_tick(&self, reason: &str) {
        self.ticks_rejected_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_late_trade(&self, outcome: &str) {
        self.late_trades_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_reconnects(&self, source: &str) {
        self.feed_reconnects_total.with_label_values(&[source]).inc();
    }

    pub fn inc_feed_rejected(&self, source: &str) {
        self.feed_rejected_messages_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn inc_feed_event(&self, source: &str) {
        self.feed_events_total.with_label_values(&[source]).inc();
    }

    pub fn inc_candles_closed(&self, symbol: &str) {
        self.candles_closed_total.with_label_values(&[symbol]).inc();
    }

    pub fn inc_wicks(&self, symbol: &str, direction: &str) {
        self.wicks_detected_total
            .with_label_values(&[symbol, direction])
            .inc();
    }

    pub fn inc_stale_input(&self, input: &str) {
        self.stale_inputs_total.with_label_values(&[input]).inc();
    }

    pub fn add_dropped_records(&self, reason: &str, count: u64) {
        self.records_dropped_total
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }

    pub fn inc_alerts(&self, outcome: &str) {
        self.alerts_total.with_label_values(&[outcome]).inc();
    }

    /// Current value of a labelled counter
    pub fn counter_value(counter: &CounterVec, label: &str) -> f64 {
        counter.with_label_values(&[label]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.records_written_total.inc();
        assert!(metrics.render().contains("wickengine_records_written_total 1"));
    }

    #[test]
    fn test_rejections_by_reason() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_rejected_tick("negative_size");
        metrics.inc_rejected_tick("negative_size");
        metrics.inc_rejected_tick("unknown_symbol");
        assert_eq!(
            Metrics::counter_value(&metrics.ticks_rejected_total, "negative_size"),
            2.0
        );
        let output = metrics.render();
        assert!(output.contains("wickengine_ticks_rejected_total"));
        assert!(output.contains("unknown_symbol"));
    }

    #[test]
    fn test_dropped_records_counted() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.add_dropped_records("shutdown", 3);
        assert_eq!(
            Metrics::counter_value(&metrics.records_dropped_total, "shutdown"),
            3.0
        );
    }
}
