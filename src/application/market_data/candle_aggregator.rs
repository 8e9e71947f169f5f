use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::{Candle, NormalizedTick, TradeSide};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// What a single trade did to its symbol's candle state.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    /// First trade of a new window with no candle to close
    Opened,
    /// Trade folded into the open candle
    Updated,
    /// Trade belongs to a later window: the previous candle closed and a new one opened
    Closed(Candle),
    /// Late trade amended the retained previous candle within the grace period
    LateApplied(Candle),
    /// Late trade outside the grace period
    LateDropped,
}

#[derive(Debug)]
struct CandleBuilder {
    symbol: String,
    timeframe: Timeframe,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    buy_volume: Decimal,
    sell_volume: Decimal,
    open_time: i64,
    trade_count: u32,
}

impl CandleBuilder {
    fn new(tick: &NormalizedTick, timeframe: Timeframe) -> Self {
        let mut builder = Self {
            symbol: tick.symbol.clone(),
            timeframe,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: Decimal::ZERO,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            open_time: timeframe.period_start(tick.timestamp),
            trade_count: 0,
        };
        builder.update(tick);
        builder
    }

    fn close_time(&self) -> i64 {
        self.open_time + self.timeframe.to_millis()
    }

    fn update(&mut self, tick: &NormalizedTick) {
        self.trade_count += 1;
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        add_volume(
            &mut self.volume,
            &mut self.buy_volume,
            &mut self.sell_volume,
            tick,
        );
    }

    fn build(&self) -> Candle {
        Candle {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            trade_count: self.trade_count,
            open_time: self.open_time,
            close_time: self.close_time(),
        }
    }
}

fn add_volume(volume: &mut Decimal, buy: &mut Decimal, sell: &mut Decimal, tick: &NormalizedTick) {
    *volume += tick.size;
    match tick.side {
        TradeSide::Buy => *buy += tick.size,
        TradeSide::Sell => *sell += tick.size,
    }
}

/// Candle state of one symbol. Mutated only through [`CandleAggregator`].
#[derive(Debug, Default)]
struct SymbolCandles {
    open: Option<CandleBuilder>,
    /// Most recently closed candles, oldest first
    retained: VecDeque<Candle>,
    /// Latest time observed for this symbol (trade timestamps and close checks)
    horizon_ms: i64,
}

impl SymbolCandles {
    fn retain(&mut self, candle: Candle, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.retained.len() >= capacity {
            self.retained.pop_front();
        }
        self.retained.push_back(candle);
    }
}

/// Buckets trades into wall-clock aligned OHLCV candles, one open candle per symbol.
///
/// Candles close either when a trade for a later window arrives or when
/// [`CandleAggregator::close_due`] observes that the window has ended, so quiet
/// markets still produce candles on time. Windows without trades produce no candle.
pub struct CandleAggregator {
    timeframe: Timeframe,
    retention: usize,
    late_grace_ms: i64,
    series: HashMap<String, SymbolCandles>,
}

impl CandleAggregator {
    pub fn new(timeframe: Timeframe, retention: usize, late_grace_ms: i64) -> Self {
        Self {
            timeframe,
            retention,
            late_grace_ms: late_grace_ms.max(0),
            series: HashMap::new(),
        }
    }

    /// Folds a validated trade into its symbol's candle state.
    pub fn on_trade(&mut self, tick: &NormalizedTick) -> TradeOutcome {
        let timeframe = self.timeframe;
        let retention = self.retention;
        let late_grace_ms = self.late_grace_ms;
        let window_start = timeframe.period_start(tick.timestamp);

        let series = self.series.entry(tick.symbol.clone()).or_default();
        series.horizon_ms = series.horizon_ms.max(tick.timestamp);

        match series.open.as_mut() {
            Some(builder) if builder.open_time == window_start => {
                builder.update(tick);
                TradeOutcome::Updated
            }
            Some(builder) if window_start > builder.open_time => {
                let completed = builder.build();
                *builder = CandleBuilder::new(tick, timeframe);

                info!(
                    "CandleAggregator: {} candle completed → O:{} H:{} L:{} C:{} V:{} ({} trades)",
                    completed.symbol,
                    completed.open,
                    completed.high,
                    completed.low,
                    completed.close,
                    completed.volume,
                    completed.trade_count
                );

                series.retain(completed.clone(), retention);
                TradeOutcome::Closed(completed)
            }
            Some(_) => Self::apply_late(series, tick, window_start, late_grace_ms),
            None => {
                let already_closed = series
                    .retained
                    .back()
                    .is_some_and(|last| window_start < last.close_time);
                if already_closed {
                    return Self::apply_late(series, tick, window_start, late_grace_ms);
                }

                debug!(
                    "CandleAggregator: {} opening window {} @ {}",
                    tick.symbol, window_start, tick.price
                );
                series.open = Some(CandleBuilder::new(tick, timeframe));
                TradeOutcome::Opened
            }
        }
    }

    /// A trade older than the open window may only amend the most recently
    /// closed candle, and only while that candle closed less than the grace
    /// period ago. The close price is kept: arrival order inside the window is
    /// no longer known.
    fn apply_late(
        series: &mut SymbolCandles,
        tick: &NormalizedTick,
        window_start: i64,
        late_grace_ms: i64,
    ) -> TradeOutcome {
        let horizon = series.horizon_ms;
        match series.retained.back_mut() {
            Some(previous)
                if previous.open_time == window_start
                    && horizon - previous.close_time <= late_grace_ms =>
            {
                previous.high = previous.high.max(tick.price);
                previous.low = previous.low.min(tick.price);
                previous.trade_count += 1;
                add_volume(
                    &mut previous.volume,
                    &mut previous.buy_volume,
                    &mut previous.sell_volume,
                    tick,
                );
                debug!(
                    "CandleAggregator: {} late trade @ {} amended candle {}",
                    tick.symbol, tick.price, previous.open_time
                );
                TradeOutcome::LateApplied(previous.clone())
            }
            _ => {
                warn!(
                    "CandleAggregator: {} late trade dropped (ts {} older than grace of {}ms)",
                    tick.symbol, tick.timestamp, late_grace_ms
                );
                TradeOutcome::LateDropped
            }
        }
    }

    /// Closes every open candle whose window ended at or before `now_ms`.
    ///
    /// Runs on a timer independent of trade arrival. Returned candles are
    /// ordered by symbol.
    pub fn close_due(&mut self, now_ms: i64) -> Vec<Candle> {
        let mut closed = Vec::new();
        for series in self.series.values_mut() {
            series.horizon_ms = series.horizon_ms.max(now_ms);
            let due = series
                .open
                .as_ref()
                .is_some_and(|builder| builder.close_time() <= now_ms);
            if !due {
                continue;
            }
            if let Some(builder) = series.open.take() {
                let candle = builder.build();
                info!(
                    "CandleAggregator: {} window {} closed by timer → O:{} H:{} L:{} C:{} V:{}",
                    candle.symbol,
                    candle.open_time,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume
                );
                series.retain(candle.clone(), self.retention);
                closed.push(candle);
            }
        }
        closed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        closed
    }

    /// Copy of the retained closed candles for `symbol`, oldest first.
    pub fn recent(&self, symbol: &str) -> Vec<Candle> {
        self.series
            .get(symbol)
            .map(|s| s.retained.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the in-progress candle for `symbol`.
    pub fn open_candle(&self, symbol: &str) -> Option<Candle> {
        self.series
            .get(symbol)
            .and_then(|s| s.open.as_ref())
            .map(CandleBuilder::build)
    }

    /// Drops every in-progress candle. Used at shutdown, where a partial
    /// window must not be evaluated as if it had closed.
    pub fn discard_open(&mut self) -> usize {
        let mut discarded = 0;
        for (symbol, series) in self.series.iter_mut() {
            if let Some(builder) = series.open.take() {
                warn!(
                    "CandleAggregator: {} discarding open candle {} ({} trades) at shutdown",
                    symbol, builder.open_time, builder.trade_count
                );
                discarded += 1;
            }
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ts(h: u32, m: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s)
            .unwrap()
            .timestamp_millis()
    }

    fn trade(price: Decimal, size: Decimal, side: TradeSide, timestamp: i64) -> NormalizedTick {
        NormalizedTick {
            symbol: "BTC-USDT".to_string(),
            price,
            size,
            side,
            timestamp,
        }
    }

    fn aggregator() -> CandleAggregator {
        CandleAggregator::new(Timeframe::OneMin, 3, 2_000)
    }

    #[test]
    fn test_candle_aggregation_realistic_prices() {
        let mut agg = aggregator();

        assert_eq!(
            agg.on_trade(&trade(dec!(68000), dec!(1.5), TradeSide::Buy, ts(0, 0, 1))),
            TradeOutcome::Opened
        );
        assert_eq!(
            agg.on_trade(&trade(dec!(68150), dec!(2.5), TradeSide::Buy, ts(0, 0, 30))),
            TradeOutcome::Updated
        );
        agg.on_trade(&trade(dec!(68100), dec!(0.8), TradeSide::Sell, ts(0, 0, 45)));
        agg.on_trade(&trade(dec!(67900), dec!(1.0), TradeSide::Sell, ts(0, 0, 59)));

        // New minute completes the previous candle
        let outcome = agg.on_trade(&trade(dec!(67950), dec!(0.5), TradeSide::Buy, ts(0, 1, 5)));
        let TradeOutcome::Closed(candle) = outcome else {
            panic!("expected a closed candle, got {:?}", outcome);
        };
        assert_eq!(candle.open, dec!(68000));
        assert_eq!(candle.high, dec!(68150));
        assert_eq!(candle.low, dec!(67900));
        assert_eq!(candle.close, dec!(67900));
        assert_eq!(candle.volume, dec!(5.8));
        assert_eq!(candle.buy_volume, dec!(4.0));
        assert_eq!(candle.sell_volume, dec!(1.8));
        assert_eq!(candle.trade_count, 4);
        assert_eq!(candle.open_time, ts(0, 0, 0));
        assert_eq!(candle.close_time, ts(0, 1, 0));
        assert!(candle.is_consistent());

        let open = agg.open_candle("BTC-USDT").unwrap();
        assert_eq!(open.open, dec!(67950));
        assert_eq!(open.volume, dec!(0.5));
    }

    #[test]
    fn test_timer_closes_quiet_window() {
        let mut agg = aggregator();
        agg.on_trade(&trade(dec!(100), dec!(1), TradeSide::Buy, ts(0, 0, 10)));

        // Window not over yet
        assert!(agg.close_due(ts(0, 0, 59)).is_empty());

        let closed = agg.close_due(ts(0, 1, 0));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_time, ts(0, 1, 0));
        assert!(agg.open_candle("BTC-USDT").is_none());

        // Nothing left to close, and empty windows produce nothing
        assert!(agg.close_due(ts(0, 5, 0)).is_empty());
        assert_eq!(agg.recent("BTC-USDT").len(), 1);
    }

    #[test]
    fn test_trade_after_timer_close_opens_new_window() {
        let mut agg = aggregator();
        agg.on_trade(&trade(dec!(100), dec!(1), TradeSide::Buy, ts(0, 0, 10)));
        agg.close_due(ts(0, 1, 0));
        assert_eq!(
            agg.on_trade(&trade(dec!(101), dec!(1), TradeSide::Buy, ts(0, 3, 0))),
            TradeOutcome::Opened
        );
    }

    #[test]
    fn test_late_trade_within_grace_amends_previous() {
        let mut agg = aggregator();
        agg.on_trade(&trade(dec!(100), dec!(1), TradeSide::Buy, ts(0, 0, 10)));
        agg.on_trade(&trade(dec!(102), dec!(1), TradeSide::Buy, ts(0, 1, 0)));

        // Right after the roll, a trade stamped inside the previous window arrives
        let outcome = agg.on_trade(&trade(dec!(97), dec!(2), TradeSide::Sell, ts(0, 0, 59)));
        let TradeOutcome::LateApplied(amended) = outcome else {
            panic!("expected late application, got {:?}", outcome);
        };
        assert_eq!(amended.low, dec!(97));
        assert_eq!(amended.close, dec!(100));
        assert_eq!(amended.volume, dec!(3));
        assert_eq!(amended.sell_volume, dec!(2));
        assert!(amended.is_consistent());
        assert_eq!(agg.recent("BTC-USDT").last().unwrap().low, dec!(97));
    }

    #[test]
    fn test_late_trade_beyond_grace_is_dropped() {
        let mut agg = aggregator();
        agg.on_trade(&trade(dec!(100), dec!(1), TradeSide::Buy, ts(0, 0, 10)));
        agg.on_trade(&trade(dec!(102), dec!(1), TradeSide::Buy, ts(0, 1, 5)));

        let outcome = agg.on_trade(&trade(dec!(90), dec!(1), TradeSide::Sell, ts(0, 0, 50)));
        assert_eq!(outcome, TradeOutcome::LateDropped);
        assert_eq!(agg.recent("BTC-USDT")[0].low, dec!(100));

        // Older than the previous candle entirely
        let outcome = agg.on_trade(&trade(dec!(90), dec!(1), TradeSide::Sell, ts(23, 59, 0) - 86_400_000));
        assert_eq!(outcome, TradeOutcome::LateDropped);
    }

    #[test]
    fn test_retention_ring_is_bounded() {
        let mut agg = aggregator();
        for minute in 0..6 {
            agg.on_trade(&trade(
                Decimal::from(100 + minute),
                dec!(1),
                TradeSide::Buy,
                ts(0, minute, 1),
            ));
        }
        let recent = agg.recent("BTC-USDT");
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].open, dec!(102));
        assert_eq!(recent[2].open, dec!(104));
        assert!(recent.windows(2).all(|w| w[0].close_time <= w[1].open_time));
    }

    #[test]
    fn test_symbols_are_independent() {
        let mut agg = aggregator();
        agg.on_trade(&trade(dec!(100), dec!(1), TradeSide::Buy, ts(0, 0, 1)));
        let mut eth = trade(dec!(3000), dec!(1), TradeSide::Buy, ts(0, 0, 2));
        eth.symbol = "ETH-USDT".to_string();
        assert_eq!(agg.on_trade(&eth), TradeOutcome::Opened);

        let closed = agg.close_due(ts(0, 1, 0));
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].symbol, "BTC-USDT");
        assert_eq!(closed[1].symbol, "ETH-USDT");
    }

    #[test]
    fn test_discard_open_at_shutdown() {
        let mut agg = aggregator();
        agg.on_trade(&trade(dec!(100), dec!(1), TradeSide::Buy, ts(0, 0, 1)));
        assert_eq!(agg.discard_open(), 1);
        assert!(agg.open_candle("BTC-USDT").is_none());
        assert!(agg.close_due(ts(1, 0, 0)).is_empty());
    }
}
