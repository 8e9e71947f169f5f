use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle window lengths supported by the aggregator.
///
/// Windows are wall-clock aligned: a window always starts on a multiple of its
/// length since the Unix epoch, independent of when trades arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    FifteenSec,
    ThirtySec,
    OneMin,
    ThreeMin,
    FiveMin,
    FifteenMin,
    OneHour,
}

impl Timeframe {
    /// Returns the duration in seconds
    pub fn to_seconds(&self) -> i64 {
        match self {
            Timeframe::FifteenSec => 15,
            Timeframe::ThirtySec => 30,
            Timeframe::OneMin => 60,
            Timeframe::ThreeMin => 180,
            Timeframe::FiveMin => 300,
            Timeframe::FifteenMin => 900,
            Timeframe::OneHour => 3600,
        }
    }

    pub fn to_millis(&self) -> i64 {
        self.to_seconds() * 1000
    }

    /// Short label used in records and alerts ("1m", "5m", ...)
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::FifteenSec => "15s",
            Timeframe::ThirtySec => "30s",
            Timeframe::OneMin => "1m",
            Timeframe::ThreeMin => "3m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
        }
    }

    /// Maps a window length in seconds (the `CANDLE_TIMEFRAME` setting) to a timeframe.
    pub fn from_seconds(secs: u64) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|tf| tf.to_seconds() as u64 == secs)
    }

    /// Returns all available timeframes in ascending order
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::FifteenSec,
            Timeframe::ThirtySec,
            Timeframe::OneMin,
            Timeframe::ThreeMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::OneHour,
        ]
    }

    /// Returns the start timestamp (ms) of the window containing `timestamp_ms`.
    ///
    /// Uses euclidean division so pre-epoch timestamps still floor downwards.
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        let period_ms = self.to_millis();
        timestamp_ms.div_euclid(period_ms) * period_ms
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "15s" => Ok(Timeframe::FifteenSec),
            "30s" => Ok(Timeframe::ThirtySec),
            "1m" | "1min" => Ok(Timeframe::OneMin),
            "3m" | "3min" => Ok(Timeframe::ThreeMin),
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "1h" | "1hour" => Ok(Timeframe::OneHour),
            other => {
                // Plain seconds, as CANDLE_TIMEFRAME is expressed
                other
                    .parse::<u64>()
                    .ok()
                    .and_then(Timeframe::from_seconds)
                    .ok_or_else(|| {
                        anyhow!(
                            "Invalid timeframe: '{}'. Valid options: 15s, 30s, 1m, 3m, 5m, 15m, 1h (or seconds)",
                            s
                        )
                    })
            }
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(Timeframe::from_str("1m").unwrap(), Timeframe::OneMin);
        assert_eq!(Timeframe::from_str("5Min").unwrap(), Timeframe::FiveMin);
        assert_eq!(Timeframe::from_str("60").unwrap(), Timeframe::OneMin);
        assert_eq!(Timeframe::from_str("900").unwrap(), Timeframe::FifteenMin);
        assert!(Timeframe::from_str("7").is_err());
        assert!(Timeframe::from_str("invalid").is_err());
    }

    #[test]
    fn test_period_start() {
        let tf = Timeframe::FiveMin;
        // 2024-01-01 00:00:00 UTC
        let base = 1704067200000i64;

        assert_eq!(tf.period_start(base), base);
        assert_eq!(tf.period_start(base + 3 * 60 * 1000), base);
        assert_eq!(tf.period_start(base + 5 * 60 * 1000), base + 5 * 60 * 1000);
        assert_eq!(tf.period_start(base + 7 * 60 * 1000), base + 5 * 60 * 1000);
    }

    #[test]
    fn test_period_start_is_wall_clock_aligned() {
        let tf = Timeframe::OneMin;
        // Any two timestamps inside the same minute share a window
        let a = 1704067200000i64 + 1_250;
        let b = 1704067200000i64 + 59_999;
        assert_eq!(tf.period_start(a), tf.period_start(b));
        assert_ne!(tf.period_start(b), tf.period_start(b + 1));
    }
}
