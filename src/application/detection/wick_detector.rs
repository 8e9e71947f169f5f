use super::gate_policy::{GateDecision, GatePolicy};
use crate::domain::market::types::Candle;
use crate::domain::wick::{WickDirection, WickEvent};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use tracing::{debug, info};

/// Per-symbol detector state.
///
/// `Idle -> Evaluate` on every candle close, then either `Evaluate -> Emit -> Idle`
/// when the candle qualifies or `Evaluate -> Idle` when it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    Evaluate,
    Emit,
}

/// Upper and lower wick ratios of a candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WickRatios {
    pub upper: f64,
    pub lower: f64,
    /// True when the body was below epsilon and the full range was used as denominator
    pub doji_guard: bool,
}

/// Computes wick/body ratios.
///
/// Epsilon is `doji_body_fraction` of the open price. When the body is smaller
/// than epsilon, the ratios are taken against the full range (high - low)
/// instead, which bounds them to [0, 1]. A zero-range candle has no wick.
pub fn wick_ratios(candle: &Candle, doji_body_fraction: Decimal) -> WickRatios {
    let body = candle.body();
    let upper_wick = candle.high - candle.body_top();
    let lower_wick = candle.body_bottom() - candle.low;
    let epsilon = (candle.open.abs() * doji_body_fraction).max(Decimal::new(1, 12));

    let doji_guard = body < epsilon;
    let denominator = if doji_guard { candle.range() } else { body };

    if denominator <= Decimal::ZERO {
        return WickRatios {
            upper: 0.0,
            lower: 0.0,
            doji_guard,
        };
    }

    let ratio = |wick: Decimal| {
        wick.checked_div(denominator)
            .and_then(|r| r.to_f64())
            .unwrap_or(0.0)
    };

    WickRatios {
        upper: ratio(upper_wick),
        lower: ratio(lower_wick),
        doji_guard,
    }
}

#[derive(Debug, Default)]
struct SymbolDetector {
    state: DetectorState,
    /// open_time of the newest candle already evaluated
    last_evaluated: Option<i64>,
}

/// Evaluates closed candles and emits at most one [`WickEvent`] per candle.
pub struct WickDetector {
    policy: GatePolicy,
    doji_body_fraction: Decimal,
    symbols: HashMap<String, SymbolDetector>,
}

impl WickDetector {
    pub fn new(policy: GatePolicy, doji_body_fraction: Decimal) -> Self {
        Self {
            policy,
            doji_body_fraction,
            symbols: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn state(&self, symbol: &str) -> DetectorState {
        self.symbols
            .get(symbol)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Runs the state machine for one closed candle.
    ///
    /// Candles close in increasing time order per symbol, so a candle whose
    /// window is not newer than the last evaluated one is a re-evaluation and
    /// never emits.
    pub fn on_candle_closed(&mut self, candle: &Candle, detected_at: i64) -> Option<WickEvent> {
        let detector = self.symbols.entry(candle.symbol.clone()).or_default();

        if detector
            .last_evaluated
            .is_some_and(|last| candle.open_time <= last)
        {
            debug!(
                "WickDetector: {} candle {} already evaluated, skipping",
                candle.symbol, candle.open_time
            );
            return None;
        }

        detector.state = DetectorState::Evaluate;
        detector.last_evaluated = Some(candle.open_time);

        let ratios = wick_ratios(candle, self.doji_body_fraction);
        let upper = self.policy.evaluate(
            ratios.upper,
            candle.high - candle.body_top(),
            candle.volume,
        );
        let lower = self.policy.evaluate(
            ratios.lower,
            candle.body_bottom() - candle.low,
            candle.volume,
        );

        let direction = match (upper.passed(), lower.passed()) {
            (true, true) if ratios.lower > ratios.upper => Some(WickDirection::Lower),
            (true, _) => Some(WickDirection::Upper),
            (false, true) => Some(WickDirection::Lower),
            (false, false) => None,
        };

        let Some(direction) = direction else {
            log_rejection(candle, &ratios, &upper, &lower);
            detector.state = DetectorState::Idle;
            return None;
        };

        detector.state = DetectorState::Emit;
        let ratio = match direction {
            WickDirection::Upper => ratios.upper,
            WickDirection::Lower => ratios.lower,
        };
        let event = WickEvent::new(candle.clone(), direction, ratio, detected_at);

        info!(
            "WickDetector: {} {} wick detected ratio={:.3}{} O:{} H:{} L:{} C:{}",
            candle.symbol,
            direction,
            ratio,
            if ratios.doji_guard { " (doji guard)" } else { "" },
            candle.open,
            candle.high,
            candle.low,
            candle.close
        );

        detector.state = DetectorState::Idle;
        Some(event)
    }
}

fn log_rejection(candle: &Candle, ratios: &WickRatios, upper: &GateDecision, lower: &GateDecision) {
    debug!(
        "WickDetector: {} candle {} no event (upper={:.3} failed {:?}, lower={:.3} failed {:?})",
        candle.symbol, candle.open_time, ratios.upper, upper.failed, ratios.lower, lower.failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::timeframe::Timeframe;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: "BTC-USDT".to_string(),
            timeframe: Timeframe::OneMin,
            open,
            high,
            low,
            close,
            volume: dec!(12),
            buy_volume: dec!(7),
            sell_volume: dec!(5),
            trade_count: 40,
            open_time: 1_704_067_200_000,
            close_time: 1_704_067_260_000,
        }
    }

    fn detector(threshold: f64) -> WickDetector {
        WickDetector::new(GatePolicy::ratio_only(threshold), dec!(0.0001))
    }

    #[test]
    fn test_upper_wick_ratio() {
        let c = candle(dec!(100), dec!(110), dec!(99), dec!(101));
        let ratios = wick_ratios(&c, dec!(0.0001));
        assert_eq!(ratios.upper, 9.0);
        assert_eq!(ratios.lower, 1.0);
        assert!(!ratios.doji_guard);
    }

    #[test]
    fn test_qualifying_candle_emits_exactly_one_event() {
        let mut d = detector(1.5);
        let c = candle(dec!(100), dec!(110), dec!(99), dec!(101));

        let event = d.on_candle_closed(&c, 1_704_067_260_500).unwrap();
        assert_eq!(event.direction, WickDirection::Upper);
        assert_eq!(event.wick_ratio, 9.0);
        assert_eq!(event.trigger_price, dec!(110));
        assert_eq!(event.id, "BTC-USDT:1704067200000:upper");
        assert_eq!(d.state("BTC-USDT"), DetectorState::Idle);

        // Re-evaluating the same closed candle never duplicates
        assert!(d.on_candle_closed(&c, 1_704_067_261_000).is_none());
        assert!(d.on_candle_closed(&c, 1_704_067_262_000).is_none());
    }

    #[test]
    fn test_near_doji_uses_full_range() {
        let c = candle(dec!(100), dec!(105), dec!(100), dec!(100.001));
        let ratios = wick_ratios(&c, dec!(0.0001));
        assert!(ratios.doji_guard);
        // (105 - 100.001) / (105 - 100)
        assert!((ratios.upper - 0.9998).abs() < 1e-12);
        assert_eq!(ratios.lower, 0.0);

        // Bounded by the range, so a 1.5 threshold is not met
        let mut d = detector(1.5);
        assert!(d.on_candle_closed(&c, 0).is_none());
    }

    #[test]
    fn test_zero_range_candle_has_no_wick() {
        let c = candle(dec!(100), dec!(100), dec!(100), dec!(100));
        let ratios = wick_ratios(&c, dec!(0.0001));
        assert_eq!(ratios.upper, 0.0);
        assert_eq!(ratios.lower, 0.0);
        assert!(detector(1.5).on_candle_closed(&c, 0).is_none());
    }

    #[test]
    fn test_larger_wick_wins_when_both_qualify() {
        let mut d = detector(1.5);
        // upper = 2, lower = 5, body = 1
        let c = candle(dec!(100), dec!(103), dec!(95), dec!(101));
        let event = d.on_candle_closed(&c, 0).unwrap();
        assert_eq!(event.direction, WickDirection::Lower);
        assert_eq!(event.wick_ratio, 5.0);
        assert_eq!(event.trigger_price, dec!(95));
    }

    #[test]
    fn test_equal_wicks_resolve_to_upper() {
        let mut d = detector(1.5);
        // upper = lower = 2
        let c = candle(dec!(100), dec!(103), dec!(98), dec!(101));
        let event = d.on_candle_closed(&c, 0).unwrap();
        assert_eq!(event.direction, WickDirection::Upper);
    }

    #[test]
    fn test_volume_gate_blocks_emission() {
        let policy = GatePolicy {
            ratio_threshold: 1.5,
            min_volume: Some(dec!(50)),
            min_price_move: None,
        };
        let mut d = WickDetector::new(policy, dec!(0.0001));
        let c = candle(dec!(100), dec!(110), dec!(99), dec!(101));
        assert!(d.on_candle_closed(&c, 0).is_none());
        assert_eq!(d.state("BTC-USDT"), DetectorState::Idle);
    }

    #[test]
    fn test_later_candle_is_evaluated_after_earlier() {
        let mut d = detector(1.5);
        let first = candle(dec!(100), dec!(110), dec!(99), dec!(101));
        let mut second = first.clone();
        second.open_time += 60_000;
        second.close_time += 60_000;

        assert!(d.on_candle_closed(&first, 0).is_some());
        assert!(d.on_candle_closed(&second, 0).is_some());
        // An older candle showing up afterwards is not evaluated
        assert!(d.on_candle_closed(&first, 0).is_none());
    }
}
