//! Detection engine configuration parsing from environment variables.
//!
//! Covers aggregation, wick gating, and feature staleness bounds.

use super::{parse_env, parse_optional};
use crate::application::detection::GatePolicy;
use crate::application::features::{ContextLimits, ExtractorConfig};
use crate::domain::errors::ConfigurationError;
use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Engine environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEnvConfig {
    pub timeframe: Timeframe,
    pub wick_min_ratio: f64,
    pub min_volume: Option<Decimal>,
    pub min_price_move: Option<Decimal>,
    /// Fraction of the open price below which a body counts as a doji
    pub doji_body_fraction: Decimal,
    pub candle_retention: usize,
    pub late_trade_grace_ms: i64,
    pub reorder_tolerance_ms: i64,
    pub orderbook_max_age_secs: i64,
    pub derivatives_max_age_secs: i64,
    pub macro_max_age_secs: i64,
    pub whale_window_minutes: i64,
    pub vwap_rolling_minutes: u32,
    /// Wall-clock candle close check period
    pub close_check_ms: u64,
}

impl Default for EngineEnvConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::OneMin,
            wick_min_ratio: 1.5,
            min_volume: None,
            min_price_move: None,
            doji_body_fraction: dec!(0.0001),
            candle_retention: 20,
            late_trade_grace_ms: 2_000,
            reorder_tolerance_ms: 2_000,
            orderbook_max_age_secs: 30,
            derivatives_max_age_secs: 300,
            macro_max_age_secs: 600,
            whale_window_minutes: 15,
            vwap_rolling_minutes: 240,
            close_check_ms: 250,
        }
    }
}

impl EngineEnvConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let defaults = Self::default();

        let timeframe_secs: u64 = parse_env("CANDLE_TIMEFRAME", 60)?;
        let timeframe =
            Timeframe::from_seconds(timeframe_secs).ok_or_else(|| ConfigurationError::Invalid {
                key: "CANDLE_TIMEFRAME",
                reason: format!("unsupported candle length {}s", timeframe_secs),
            })?;

        Ok(Self {
            timeframe,
            wick_min_ratio: parse_env("WICK_MIN_RATIO", defaults.wick_min_ratio)?,
            min_volume: parse_optional("WICK_MIN_VOLUME")?,
            min_price_move: parse_optional("WICK_MIN_PRICE_MOVE")?,
            doji_body_fraction: parse_env("DOJI_BODY_FRACTION", defaults.doji_body_fraction)?,
            candle_retention: parse_env("CANDLE_RETENTION", defaults.candle_retention)?,
            late_trade_grace_ms: parse_env("LATE_TRADE_GRACE_MS", defaults.late_trade_grace_ms)?,
            reorder_tolerance_ms: parse_env(
                "TICK_REORDER_TOLERANCE_MS",
                defaults.reorder_tolerance_ms,
            )?,
            orderbook_max_age_secs: parse_env(
                "ORDERBOOK_MAX_AGE_SECS",
                defaults.orderbook_max_age_secs,
            )?,
            derivatives_max_age_secs: parse_env(
                "DERIVATIVES_MAX_AGE_SECS",
                defaults.derivatives_max_age_secs,
            )?,
            macro_max_age_secs: parse_env("MACRO_MAX_AGE_SECS", defaults.macro_max_age_secs)?,
            whale_window_minutes: parse_env(
                "WHALE_WINDOW_MINUTES",
                defaults.whale_window_minutes,
            )?,
            vwap_rolling_minutes: parse_env(
                "VWAP_ROLLING_MINUTES",
                defaults.vwap_rolling_minutes,
            )?,
            close_check_ms: parse_env("CLOSE_CHECK_MS", defaults.close_check_ms)?,
        })
    }

    pub fn gate_policy(&self) -> GatePolicy {
        GatePolicy {
            ratio_threshold: self.wick_min_ratio,
            min_volume: self.min_volume,
            min_price_move: self.min_price_move,
        }
    }

    pub fn context_limits(&self) -> ContextLimits {
        ContextLimits {
            orderbook_max_age_ms: self.orderbook_max_age_secs * 1_000,
            derivatives_max_age_ms: self.derivatives_max_age_secs * 1_000,
            macro_max_age_ms: self.macro_max_age_secs * 1_000,
            whale_window_ms: self.whale_window_minutes * 60_000,
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            limits: self.context_limits(),
            doji_body_fraction: self.doji_body_fraction,
            ratio_threshold: self.wick_min_ratio,
        }
    }
}
