use crate::application::detection::WickDetector;
use crate::application::features::{FeatureContext, FeatureExtractor};
use crate::application::market_data::candle_aggregator::{CandleAggregator, TradeOutcome};
use crate::application::market_data::snapshot_store::SnapshotStore;
use crate::application::market_data::trade_stats::TradeStats;
use crate::application::validation::TickValidator;
use crate::domain::market::types::{Candle, NormalizedTick};
use crate::domain::storage::PendingRecord;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where whale transfers come from, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WhaleContext {
    Disabled,
    Window { window_ms: i64 },
}

/// Validation, aggregation, detection and extraction for every symbol.
///
/// One instance is driven by a single task, so ticks of a symbol are
/// processed strictly in arrival order and each closed candle is evaluated
/// exactly once. All methods are synchronous; timestamps are passed in.
pub struct DetectionPipeline {
    validator: TickValidator,
    aggregator: CandleAggregator,
    stats: TradeStats,
    detector: WickDetector,
    extractor: Box<dyn FeatureExtractor>,
    snapshots: Arc<SnapshotStore>,
    whales: WhaleContext,
    metrics: Metrics,
}

impl DetectionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: TickValidator,
        aggregator: CandleAggregator,
        stats: TradeStats,
        detector: WickDetector,
        extractor: Box<dyn FeatureExtractor>,
        snapshots: Arc<SnapshotStore>,
        whales: WhaleContext,
        metrics: Metrics,
    ) -> Self {
        Self {
            validator,
            aggregator,
            stats,
            detector,
            extractor,
            snapshots,
            whales,
            metrics,
        }
    }

    /// Processes one tick. Returns the record of a wick event when the tick
    /// closed a qualifying candle.
    pub fn on_tick(&mut self, tick: &NormalizedTick, now_ms: i64) -> Option<PendingRecord> {
        if let Err(e) = self.validator.validate(tick) {
            self.metrics.inc_rejected_tick(e.reason());
            warn!("DetectionPipeline: tick rejected: {}", e);
            return None;
        }

        let outcome = self.aggregator.on_trade(tick);
        let record = match &outcome {
            // Statistics are read before this tick is counted: it belongs to the next window
            TradeOutcome::Closed(candle) => self.on_candle_closed(candle, now_ms),
            TradeOutcome::LateApplied(_) => {
                self.metrics.inc_late_trade("applied");
                None
            }
            TradeOutcome::LateDropped => {
                self.metrics.inc_late_trade("dropped");
                None
            }
            TradeOutcome::Opened | TradeOutcome::Updated => None,
        };

        if !matches!(outcome, TradeOutcome::LateDropped) {
            self.stats.record(tick);
        }
        record
    }

    /// Closes every candle whose window ended at or before `now_ms`.
    pub fn on_timer(&mut self, now_ms: i64) -> Vec<PendingRecord> {
        self.aggregator
            .close_due(now_ms)
            .iter()
            .filter_map(|candle| self.on_candle_closed(candle, now_ms))
            .collect()
    }

    /// Drops in-progress candles at shutdown. Returns how many were discarded.
    pub fn shutdown(&mut self) -> usize {
        let discarded = self.aggregator.discard_open();
        if discarded > 0 {
            info!(
                "DetectionPipeline: discarded {} partial candle(s) at shutdown",
                discarded
            );
        }
        discarded
    }

    pub fn aggregator(&self) -> &CandleAggregator {
        &self.aggregator
    }

    fn on_candle_closed(&mut self, candle: &Candle, now_ms: i64) -> Option<PendingRecord> {
        self.metrics.inc_candles_closed(&candle.symbol);
        let event = self.detector.on_candle_closed(candle, now_ms)?;
        self.metrics
            .inc_wicks(&event.candle.symbol, event.direction.as_str());

        let symbol = event.candle.symbol.as_str();
        let event_time = event.event_time();

        // Owned copies, so extraction sees a fixed view of the context
        let history: Vec<Candle> = self
            .aggregator
            .recent(symbol)
            .into_iter()
            .filter(|c| c.open_time < event.candle.open_time)
            .collect();
        let orderbook = self.snapshots.orderbook_at(symbol, event_time);
        let derivatives = self.snapshots.derivatives_at(symbol, event_time);
        let macro_snapshot = self.snapshots.macro_at(event_time);
        let whales = match self.whales {
            WhaleContext::Disabled => None,
            WhaleContext::Window { window_ms } => Some(self.snapshots.whales_between(
                symbol,
                event_time - window_ms,
                event_time,
            )),
        };
        let vwap = self.stats.snapshot(symbol);

        let ctx = FeatureContext {
            event: &event,
            history: &history,
            orderbook: orderbook.as_ref().map(|(ts, b)| (*ts, b)),
            derivatives: derivatives.as_ref().map(|(ts, d)| (*ts, d)),
            macro_snapshot: macro_snapshot.as_ref().map(|(ts, m)| (*ts, m)),
            whales: whales.as_deref(),
            vwap: vwap.as_ref(),
        };
        let extraction = self.extractor.extract(&ctx);

        for stale in &extraction.stale {
            self.metrics.inc_stale_input(stale.input());
            debug!("DetectionPipeline: {} {}", event.id, stale);
        }

        Some(PendingRecord {
            event,
            features: extraction.features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::detection::GatePolicy;
    use crate::application::features::{ContextLimits, ExtractorConfig, StandardFeatureExtractor};
    use crate::domain::features::{Feature, MISSING_FEATURE};
    use crate::domain::market::timeframe::Timeframe;
    use crate::domain::market::types::{
        NormalizedSnapshot, OrderBookSnapshot, SnapshotPayload, TradeSide,
    };
    use crate::domain::wick::WickDirection;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_704_067_200_000;

    fn pipeline(store: Arc<SnapshotStore>, metrics: Metrics) -> DetectionPipeline {
        let extractor = StandardFeatureExtractor::new(ExtractorConfig {
            limits: ContextLimits::default(),
            doji_body_fraction: dec!(0.0001),
            ratio_threshold: 1.5,
        });
        DetectionPipeline::new(
            TickValidator::new(["BTC-USDT"], 2_000),
            CandleAggregator::new(Timeframe::OneMin, 50, 2_000),
            TradeStats::new(240),
            WickDetector::new(GatePolicy::ratio_only(1.5), dec!(0.0001)),
            Box::new(extractor),
            store,
            WhaleContext::Disabled,
            metrics,
        )
    }

    fn tick(price: Decimal, ts: i64) -> NormalizedTick {
        NormalizedTick {
            symbol: "BTC-USDT".to_string(),
            price,
            size: dec!(1),
            side: TradeSide::Buy,
            timestamp: ts,
        }
    }

    #[test]
    fn test_wick_candle_produces_record_on_next_window() {
        let store = Arc::new(SnapshotStore::new());
        store.apply(NormalizedSnapshot {
            symbol: "BTC-USDT".to_string(),
            timestamp: T0 + 59_000,
            payload: SnapshotPayload::OrderBook(OrderBookSnapshot {
                bids: vec![(100.9, 2.0)],
                asks: vec![(101.1, 1.0)],
            }),
        });
        let metrics = Metrics::new().unwrap();
        let mut p = pipeline(store, metrics.clone());

        for (price, offset) in [(dec!(100), 0), (dec!(110), 10_000), (dec!(99), 20_000), (dec!(101), 50_000)] {
            assert!(p.on_tick(&tick(price, T0 + offset), T0 + offset).is_none());
        }
        let record = p.on_tick(&tick(dec!(101), T0 + 61_000), T0 + 61_000).unwrap();

        assert_eq!(record.event.direction, WickDirection::Upper);
        assert_eq!(record.event.wick_ratio, 9.0);
        assert_eq!(record.event.detected_at, T0 + 61_000);
        assert!(record.features.get(Feature::Spread) > 0.0);
        assert_eq!(record.features.get(Feature::FundingRateNow), MISSING_FEATURE);
        // The closing tick is not part of the closed candle's VWAP
        let vwap = (100.0 + 110.0 + 99.0 + 101.0) / 4.0;
        let distance = record.features.get(Feature::RollingVwapDistance);
        assert!((distance - (101.0 - vwap) / vwap).abs() < 1e-12);
        assert_eq!(
            Metrics::counter_value(&metrics.stale_inputs_total, "derivatives"),
            1.0
        );
    }

    #[test]
    fn test_timer_closes_quiet_window() {
        let mut p = pipeline(Arc::new(SnapshotStore::new()), Metrics::new().unwrap());
        p.on_tick(&tick(dec!(100), T0), T0);
        p.on_tick(&tick(dec!(90), T0 + 1_000), T0 + 1_000);
        p.on_tick(&tick(dec!(101), T0 + 2_000), T0 + 2_000);

        assert!(p.on_timer(T0 + 59_999).is_empty());
        let records = p.on_timer(T0 + 60_000);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.direction, WickDirection::Lower);
        // Never re-evaluated
        assert!(p.on_timer(T0 + 120_000).is_empty());
    }

    #[test]
    fn test_invalid_tick_counted_and_ignored() {
        let metrics = Metrics::new().unwrap();
        let mut p = pipeline(Arc::new(SnapshotStore::new()), metrics.clone());
        assert!(p.on_tick(&tick(dec!(-1), T0), T0).is_none());
        let mut unknown = tick(dec!(100), T0);
        unknown.symbol = "DOGE-USDT".to_string();
        assert!(p.on_tick(&unknown, T0).is_none());

        assert_eq!(
            Metrics::counter_value(&metrics.ticks_rejected_total, "non_positive_price"),
            1.0
        );
        assert_eq!(
            Metrics::counter_value(&metrics.ticks_rejected_total, "unknown_symbol"),
            1.0
        );
        assert!(p.aggregator().open_candle("BTC-USDT").is_none());
    }

    #[test]
    fn test_shutdown_discards_partial_candle() {
        let mut p = pipeline(Arc::new(SnapshotStore::new()), Metrics::new().unwrap());
        p.on_tick(&tick(dec!(100), T0), T0);
        assert_eq!(p.shutdown(), 1);
        assert!(p.on_timer(T0 + 120_000).is_empty());
    }
}
