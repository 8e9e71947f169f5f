use super::decode_body;
use super::poller::PollSource;
use crate::domain::errors::FeedError;
use crate::domain::market::types::{
    FeedEvent, FeedSource, MARKET_WIDE, MacroSnapshot, NormalizedSnapshot, RejectedInput,
    SnapshotPayload,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    market_cap_percentage: HashMap<String, f64>,
    #[serde(default)]
    updated_at: Option<i64>,
}

/// Dominance figures from the `/global` payload. Returns `None` when BTC
/// dominance is absent; USDT falls back to zero.
fn parse_global(body: &str) -> Result<Option<(MacroSnapshot, Option<i64>)>, FeedError> {
    let response: GlobalResponse = decode_body(FeedSource::CoinGecko, body)?;
    let pct = &response.data.market_cap_percentage;
    Ok(pct.get("btc").map(|btc| {
        (
            MacroSnapshot {
                btc_dominance: *btc,
                usdt_dominance: pct.get("usdt").copied().unwrap_or(0.0),
            },
            response.data.updated_at.map(|secs| secs * 1000),
        )
    }))
}

/// Polls market-wide dominance.
pub struct CoinGeckoClient {
    http: ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
    interval: Duration,
}

impl CoinGeckoClient {
    pub fn new(
        http: ClientWithMiddleware,
        base_url: String,
        api_key: Option<String>,
        interval: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key,
            interval,
        }
    }
}

#[async_trait]
impl PollSource for CoinGeckoClient {
    fn source(&self) -> FeedSource {
        FeedSource::CoinGecko
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&mut self) -> Result<Vec<FeedEvent>, FeedError> {
        let transient = |reason: String| FeedError::TransientNetwork {
            source_name: FeedSource::CoinGecko.to_string(),
            reason,
        };

        let mut request = self.http.get(format!("{}/global", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }
        let resp = request.send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(transient(format!("/global returned {}", status)));
        }
        let body = resp.text().await.map_err(|e| transient(e.to_string()))?;

        match parse_global(&body)? {
            Some((snapshot, updated_at)) => Ok(vec![FeedEvent::Snapshot(NormalizedSnapshot {
                symbol: MARKET_WIDE.to_string(),
                timestamp: updated_at.unwrap_or_else(|| Utc::now().timestamp_millis()),
                payload: SnapshotPayload::Macro(snapshot),
            })]),
            None => Ok(vec![FeedEvent::Rejected(RejectedInput::new(
                FeedSource::CoinGecko,
                "missing btc dominance",
                &body,
            ))]),
        }
    }
}
