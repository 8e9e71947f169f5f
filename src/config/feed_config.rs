//! Feed configuration parsing from environment variables.
//!
//! One websocket venue plus three optional polled context sources.

use super::{optional_string, parse_env, parse_list};
use crate::domain::errors::ConfigurationError;
use crate::infrastructure::feeds::coinalyze::COINALYZE_BASE_URL;
use crate::infrastructure::feeds::coingecko::COINGECKO_BASE_URL;
use crate::infrastructure::feeds::whale_alert::WHALE_ALERT_BASE_URL;
use std::env;

pub const OKX_PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const DEFAULT_SYMBOLS: &str = "BTC-USDT,ETH-USDT,SOL-USDT";

/// Feed environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEnvConfig {
    pub okx_ws_url: String,
    pub symbols: Vec<String>,
    pub coinalyze_api_key: Option<String>,
    pub coinalyze_base_url: String,
    pub coinalyze_interval_secs: u64,
    pub coingecko_api_key: Option<String>,
    pub coingecko_base_url: String,
    pub coingecko_interval_secs: u64,
    pub whale_alert_key: Option<String>,
    pub whale_alert_base_url: String,
    pub whale_alert_interval_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for FeedEnvConfig {
    fn default() -> Self {
        Self {
            okx_ws_url: OKX_PUBLIC_WS_URL.to_string(),
            symbols: DEFAULT_SYMBOLS.split(',').map(str::to_string).collect(),
            coinalyze_api_key: None,
            coinalyze_base_url: COINALYZE_BASE_URL.to_string(),
            coinalyze_interval_secs: 30,
            coingecko_api_key: None,
            coingecko_base_url: COINGECKO_BASE_URL.to_string(),
            coingecko_interval_secs: 60,
            whale_alert_key: None,
            whale_alert_base_url: WHALE_ALERT_BASE_URL.to_string(),
            whale_alert_interval_secs: 60,
            http_timeout_secs: 10,
        }
    }
}

impl FeedEnvConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let defaults = Self::default();
        Ok(Self {
            okx_ws_url: env::var("OKX_WS_URL").unwrap_or(defaults.okx_ws_url),
            symbols: parse_list("OKX_SYMBOLS", DEFAULT_SYMBOLS),
            coinalyze_api_key: optional_string("COINALYZE_API_KEY"),
            coinalyze_base_url: env::var("COINALYZE_BASE_URL")
                .unwrap_or(defaults.coinalyze_base_url),
            coinalyze_interval_secs: parse_env(
                "COINALYZE_POLL_SECS",
                defaults.coinalyze_interval_secs,
            )?,
            coingecko_api_key: optional_string("COINGECKO_API_KEY"),
            coingecko_base_url: env::var("COINGECKO_BASE_URL")
                .unwrap_or(defaults.coingecko_base_url),
            coingecko_interval_secs: parse_env(
                "COINGECKO_POLL_SECS",
                defaults.coingecko_interval_secs,
            )?,
            whale_alert_key: optional_string("WHALE_ALERT_KEY"),
            whale_alert_base_url: env::var("WHALE_ALERT_BASE_URL")
                .unwrap_or(defaults.whale_alert_base_url),
            whale_alert_interval_secs: parse_env(
                "WHALE_ALERT_POLL_SECS",
                defaults.whale_alert_interval_secs,
            )?,
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
        })
    }

    pub fn whale_feed_enabled(&self) -> bool {
        self.whale_alert_key.is_some()
    }
}
