use crate::domain::errors::ValidationError;
use crate::domain::market::types::NormalizedTick;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// Rejects malformed ticks before they reach the aggregator.
///
/// Ticks from multiplexed venues may arrive slightly out of order, so a tick is
/// only refused when it trails the newest accepted tick of its symbol by more
/// than `reorder_tolerance_ms`. Accepted ticks are never modified.
pub struct TickValidator {
    symbols: HashSet<String>,
    latest_ts: HashMap<String, i64>,
    reorder_tolerance_ms: i64,
}

impl TickValidator {
    pub fn new<I, S>(symbols: I, reorder_tolerance_ms: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            latest_ts: HashMap::new(),
            reorder_tolerance_ms: reorder_tolerance_ms.max(0),
        }
    }

    pub fn validate(&mut self, tick: &NormalizedTick) -> Result<(), ValidationError> {
        if !self.symbols.contains(&tick.symbol) {
            return Err(ValidationError::UnknownSymbol {
                symbol: tick.symbol.clone(),
            });
        }

        if tick.price <= Decimal::ZERO {
            return Err(ValidationError::NonPositivePrice {
                symbol: tick.symbol.clone(),
                price: tick.price,
            });
        }

        if tick.size < Decimal::ZERO {
            return Err(ValidationError::NegativeSize {
                symbol: tick.symbol.clone(),
                size: tick.size,
            });
        }

        if let Some(latest) = self.latest_ts.get(&tick.symbol)
            && latest - tick.timestamp > self.reorder_tolerance_ms
        {
            return Err(ValidationError::OutOfOrder {
                symbol: tick.symbol.clone(),
                lag_ms: latest - tick.timestamp,
                tolerance_ms: self.reorder_tolerance_ms,
            });
        }

        let latest = self.latest_ts.entry(tick.symbol.clone()).or_insert(i64::MIN);
        *latest = (*latest).max(tick.timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::types::TradeSide;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, price: Decimal, size: Decimal, ts: i64) -> NormalizedTick {
        NormalizedTick {
            symbol: symbol.to_string(),
            price,
            size,
            side: TradeSide::Buy,
            timestamp: ts,
        }
    }

    fn validator() -> TickValidator {
        TickValidator::new(["BTC-USDT", "ETH-USDT"], 2_000)
    }

    #[test]
    fn test_accepts_well_formed_tick() {
        let mut v = validator();
        assert!(v.validate(&tick("BTC-USDT", dec!(65000.5), dec!(0.01), 1_000)).is_ok());
        // Zero size is allowed
        assert!(v.validate(&tick("BTC-USDT", dec!(65000.5), dec!(0), 1_001)).is_ok());
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let mut v = validator();
        let err = v
            .validate(&tick("BTC-USDT", dec!(0), dec!(1), 1_000))
            .unwrap_err();
        assert_eq!(err.reason(), "non_positive_price");
        let err = v
            .validate(&tick("BTC-USDT", dec!(-3), dec!(1), 1_000))
            .unwrap_err();
        assert_eq!(err.reason(), "non_positive_price");
    }

    #[test]
    fn test_rejects_negative_size() {
        let mut v = validator();
        let err = v
            .validate(&tick("ETH-USDT", dec!(3000), dec!(-0.5), 1_000))
            .unwrap_err();
        assert!(matches!(err, ValidationError::NegativeSize { .. }));
    }

    #[test]
    fn test_rejects_unknown_symbol() {
        let mut v = validator();
        let err = v
            .validate(&tick("DOGE-USDT", dec!(0.1), dec!(10), 1_000))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownSymbol {
                symbol: "DOGE-USDT".to_string()
            }
        );
    }

    #[test]
    fn test_reorder_tolerance() {
        let mut v = validator();
        assert!(v.validate(&tick("BTC-USDT", dec!(1), dec!(1), 10_000)).is_ok());
        // 1.5s behind: inside tolerance
        assert!(v.validate(&tick("BTC-USDT", dec!(1), dec!(1), 8_500)).is_ok());
        // Exactly at the tolerance boundary
        assert!(v.validate(&tick("BTC-USDT", dec!(1), dec!(1), 8_000)).is_ok());
        // 2.5s behind: rejected
        let err = v
            .validate(&tick("BTC-USDT", dec!(1), dec!(1), 7_500))
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfOrder { lag_ms: 2_500, .. }));
        // Other symbols keep their own watermark
        assert!(v.validate(&tick("ETH-USDT", dec!(1), dec!(1), 1_000)).is_ok());
    }

    #[test]
    fn test_rejected_tick_does_not_move_watermark() {
        let mut v = validator();
        assert!(v.validate(&tick("BTC-USDT", dec!(1), dec!(1), 10_000)).is_ok());
        assert!(v.validate(&tick("BTC-USDT", dec!(0), dec!(1), 50_000)).is_err());
        assert!(v.validate(&tick("BTC-USDT", dec!(1), dec!(1), 9_000)).is_ok());
    }
}
