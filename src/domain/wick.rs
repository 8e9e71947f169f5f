use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::market::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WickDirection {
    /// Wick above max(open, close)
    Upper,
    /// Wick below min(open, close)
    Lower,
}

impl WickDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WickDirection::Upper => "upper",
            WickDirection::Lower => "lower",
        }
    }
}

impl fmt::Display for WickDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A qualifying wick on a closed candle. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WickEvent {
    /// `{symbol}:{open_time}:{direction}`
    pub id: String,
    pub symbol: String,
    pub candle: Candle,
    pub direction: WickDirection,
    pub wick_ratio: f64,
    /// Wick extreme: the candle high for upper wicks, the low for lower wicks
    pub trigger_price: Decimal,
    pub detected_at: i64,
}

impl WickEvent {
    pub fn new(candle: Candle, direction: WickDirection, wick_ratio: f64, detected_at: i64) -> Self {
        let trigger_price = match direction {
            WickDirection::Upper => candle.high,
            WickDirection::Lower => candle.low,
        };
        Self {
            id: format!("{}:{}:{}", candle.symbol, candle.open_time, direction),
            symbol: candle.symbol.clone(),
            candle,
            direction,
            wick_ratio,
            trigger_price,
            detected_at,
        }
    }

    /// Event time used for every context lookup: the close of the triggering window.
    pub fn event_time(&self) -> i64 {
        self.candle.close_time
    }
}
