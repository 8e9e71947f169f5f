//! Configuration module for the wick engine.
//!
//! Configuration is loaded from environment variables (after `dotenvy` has read
//! any `.env` file), organized by concern: Feeds, Engine, Storage, Alerts and
//! Observability. Any failure here is a [`ConfigurationError`] and is only
//! ever raised at startup.

mod alert_config;
mod engine_config;
mod feed_config;
mod observability_config;
mod storage_config;

pub use alert_config::AlertEnvConfig;
pub use engine_config::EngineEnvConfig;
pub use feed_config::{FeedEnvConfig, OKX_PUBLIC_WS_URL};
pub use observability_config::ObservabilityEnvConfig;
pub use storage_config::StorageEnvConfig;

use crate::domain::errors::ConfigurationError;
use rust_decimal::Decimal;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Reads `key`, falling back to `default` when unset or blank.
pub(crate) fn parse_env<T>(key: &'static str, default: T) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

/// Reads `key` as an optional setting: unset or blank means `None`.
pub(crate) fn parse_optional<T>(key: &'static str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = optional_string(key) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| ConfigurationError::Invalid {
            key,
            reason: format!("'{}': {}", raw, e),
        })
}

pub(crate) fn optional_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Comma-separated list, upper-cased and trimmed.
pub(crate) fn parse_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub feeds: FeedEnvConfig,
    pub engine: EngineEnvConfig,
    pub storage: StorageEnvConfig,
    pub alerts: AlertEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Ok(Self {
            feeds: FeedEnvConfig::from_env()?,
            engine: EngineEnvConfig::from_env()?,
            storage: StorageEnvConfig::from_env()?,
            alerts: AlertEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env(),
        })
    }

    /// Checks cross-field invariants. Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |key: &'static str, reason: String| Err(ConfigurationError::Invalid { key, reason });

        if self.feeds.symbols.is_empty() {
            return Err(ConfigurationError::Missing { key: "OKX_SYMBOLS" });
        }
        if let Some(bad) = self
            .feeds
            .symbols
            .iter()
            .find(|s| s.split_once('-').is_none_or(|(base, quote)| base.is_empty() || quote.is_empty()))
        {
            return invalid("OKX_SYMBOLS", format!("'{}' is not BASE-QUOTE", bad));
        }

        match url::Url::parse(&self.feeds.okx_ws_url) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            Ok(url) => return invalid("OKX_WS_URL", format!("unsupported scheme {}", url.scheme())),
            Err(e) => return invalid("OKX_WS_URL", e.to_string()),
        }
        for (key, secs) in [
            ("COINALYZE_POLL_SECS", self.feeds.coinalyze_interval_secs),
            ("COINGECKO_POLL_SECS", self.feeds.coingecko_interval_secs),
            ("WHALE_ALERT_POLL_SECS", self.feeds.whale_alert_interval_secs),
            ("HTTP_TIMEOUT_SECS", self.feeds.http_timeout_secs),
        ] {
            if secs == 0 {
                return invalid(key, "must be greater than zero".to_string());
            }
        }

        let engine = &self.engine;
        if !engine.wick_min_ratio.is_finite() || engine.wick_min_ratio <= 0.0 {
            return invalid("WICK_MIN_RATIO", format!("{} must be positive", engine.wick_min_ratio));
        }
        for (key, value) in [
            ("WICK_MIN_VOLUME", engine.min_volume),
            ("WICK_MIN_PRICE_MOVE", engine.min_price_move),
        ] {
            if let Some(v) = value
                && v < Decimal::ZERO
            {
                return invalid(key, format!("{} must not be negative", v));
            }
        }
        if engine.doji_body_fraction <= Decimal::ZERO || engine.doji_body_fraction >= Decimal::ONE {
            return invalid(
                "DOJI_BODY_FRACTION",
                format!("{} must be in (0, 1)", engine.doji_body_fraction),
            );
        }
        if engine.candle_retention == 0 {
            return invalid("CANDLE_RETENTION", "must keep at least one candle".to_string());
        }
        if engine.late_trade_grace_ms < 0 || engine.late_trade_grace_ms >= engine.timeframe.to_millis() {
            return invalid(
                "LATE_TRADE_GRACE_MS",
                format!(
                    "{} must be within [0, {}) for a {} candle",
                    engine.late_trade_grace_ms,
                    engine.timeframe.to_millis(),
                    engine.timeframe
                ),
            );
        }
        if engine.reorder_tolerance_ms < 0 {
            return invalid("TICK_REORDER_TOLERANCE_MS", "must not be negative".to_string());
        }
        for (key, value) in [
            ("ORDERBOOK_MAX_AGE_SECS", engine.orderbook_max_age_secs),
            ("DERIVATIVES_MAX_AGE_SECS", engine.derivatives_max_age_secs),
            ("MACRO_MAX_AGE_SECS", engine.macro_max_age_secs),
            ("WHALE_WINDOW_MINUTES", engine.whale_window_minutes),
        ] {
            if value <= 0 {
                return invalid(key, "must be greater than zero".to_string());
            }
        }
        if engine.vwap_rolling_minutes == 0 {
            return invalid("VWAP_ROLLING_MINUTES", "must be greater than zero".to_string());
        }
        if engine.close_check_ms == 0 {
            return invalid("CLOSE_CHECK_MS", "must be greater than zero".to_string());
        }

        if self.storage.rotation_mb == 0 {
            return invalid("FILE_ROTATION_MB", "must be greater than zero".to_string());
        }
        if self.storage.record_queue_capacity == 0 {
            return invalid("RECORD_QUEUE_CAPACITY", "must be greater than zero".to_string());
        }

        if self.alerts.queue_capacity == 0 {
            return invalid("ALERT_QUEUE_CAPACITY", "must be greater than zero".to_string());
        }
        if self.alerts.max_attempts == 0 {
            return invalid("ALERT_MAX_ATTEMPTS", "must be at least 1".to_string());
        }
        for url in [
            &self.alerts.webhooks.general,
            &self.alerts.webhooks.btc,
            &self.alerts.webhooks.eth,
            &self.alerts.webhooks.sol,
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = url::Url::parse(url) {
                return invalid("DISCORD_WEBHOOK", e.to_string());
            }
        }

        if self.observability.enabled && self.observability.interval_secs == 0 {
            return invalid("OBSERVABILITY_INTERVAL", "must be greater than zero".to_string());
        }

        Ok(())
    }
}
