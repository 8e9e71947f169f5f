use super::decode_body;
use super::poller::PollSource;
use crate::domain::errors::FeedError;
use crate::domain::market::types::{
    FeedEvent, FeedSource, NormalizedSnapshot, SnapshotPayload, WhaleTransaction,
};
use crate::infrastructure::core::build_url_with_query;
use async_trait::async_trait;
use chrono::Utc;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const WHALE_ALERT_BASE_URL: &str = "https://api.whale-alert.io/v1";
pub const WHALE_MIN_VALUE_USD: u64 = 500_000;
/// The API refuses `start` values older than one hour
const MAX_LOOKBACK_SECS: i64 = 3_600;

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    result: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    symbol: String,
    hash: String,
    /// Seconds since epoch
    timestamp: i64,
    amount_usd: f64,
}

/// Base asset of an engine symbol: `BTC-USDT` -> `btc`.
fn base_asset(symbol: &str) -> String {
    symbol
        .split('-')
        .next()
        .unwrap_or(symbol)
        .to_lowercase()
}

/// Maps transfers onto engine symbols by base asset. Transfers of assets no
/// symbol trades are ignored.
fn transfers_for(symbols: &[String], body: &str) -> Result<Vec<FeedEvent>, FeedError> {
    let response: TransactionsResponse = decode_body(FeedSource::WhaleAlert, body)?;
    if response.result != "success" {
        return Err(FeedError::Protocol {
            source_name: FeedSource::WhaleAlert.to_string(),
            reason: response.message.unwrap_or(response.result),
        });
    }

    let mut events = Vec::new();
    for tx in response.transactions {
        let asset = tx.symbol.to_lowercase();
        for symbol in symbols.iter().filter(|s| base_asset(s) == asset) {
            events.push(FeedEvent::Snapshot(NormalizedSnapshot {
                symbol: symbol.clone(),
                timestamp: tx.timestamp * 1000,
                payload: SnapshotPayload::Whale(WhaleTransaction {
                    asset: asset.clone(),
                    amount_usd: tx.amount_usd,
                    hash: tx.hash.clone(),
                }),
            }));
        }
    }
    Ok(events)
}

/// Polls large on-chain transfers.
pub struct WhaleAlertClient {
    http: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    symbols: Vec<String>,
    interval: Duration,
    /// Newest transfer time seen, seconds
    cursor_secs: Option<i64>,
}

impl WhaleAlertClient {
    pub fn new(
        http: ClientWithMiddleware,
        base_url: String,
        api_key: String,
        symbols: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key,
            symbols,
            interval,
            cursor_secs: None,
        }
    }
}

#[async_trait]
impl PollSource for WhaleAlertClient {
    fn source(&self) -> FeedSource {
        FeedSource::WhaleAlert
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&mut self) -> Result<Vec<FeedEvent>, FeedError> {
        let transient = |reason: String| FeedError::TransientNetwork {
            source_name: FeedSource::WhaleAlert.to_string(),
            reason,
        };
        let now_secs = Utc::now().timestamp();
        let start = self
            .cursor_secs
            .unwrap_or(now_secs - self.interval.as_secs() as i64)
            .max(now_secs - MAX_LOOKBACK_SECS);

        let url = build_url_with_query(
            &format!("{}/transactions", self.base_url),
            &[
                ("api_key", self.api_key.clone()),
                ("min_value", WHALE_MIN_VALUE_USD.to_string()),
                ("start", start.to_string()),
            ],
        )
        .map_err(|e| transient(e.to_string()))?;

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(transient(format!("/transactions returned {}", status)));
        }
        let body = resp.text().await.map_err(|e| transient(e.to_string()))?;

        let events = transfers_for(&self.symbols, &body)?;
        let newest = events
            .iter()
            .filter_map(|e| match e {
                FeedEvent::Snapshot(s) => Some(s.timestamp / 1000),
                _ => None,
            })
            .max();
        if let Some(newest) = newest {
            self.cursor_secs = Some(newest);
        }
        debug!("WhaleAlertClient: {} transfer(s) since {}", events.len(), start);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols() -> Vec<String> {
        vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()]
    }

    #[test]
    fn test_transfers_mapped_by_base_asset() {
        let body = r#"{"result":"success","cursor":"x","count":3,"transactions":[
            {"blockchain":"bitcoin","symbol":"btc","hash":"h1","timestamp":1704067200,"amount":20.0,"amount_usd":850000.0},
            {"blockchain":"ethereum","symbol":"ETH","hash":"h2","timestamp":1704067260,"amount":400.0,"amount_usd":920000.0},
            {"blockchain":"tron","symbol":"trx","hash":"h3","timestamp":1704067270,"amount":1.0,"amount_usd":600000.0}]}"#;
        let events = transfers_for(&symbols(), body).unwrap();
        assert_eq!(events.len(), 2);
        match &events[1] {
            FeedEvent::Snapshot(s) => {
                assert_eq!(s.symbol, "ETH-USDT");
                assert_eq!(s.timestamp, 1_704_067_260_000);
                assert!(matches!(&s.payload, SnapshotPayload::Whale(tx) if tx.hash == "h2"));
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_error_result_is_protocol_error() {
        let body = r#"{"result":"error","message":"invalid api_key"}"#;
        match transfers_for(&symbols(), body) {
            Err(FeedError::Protocol { reason, .. }) => assert_eq!(reason, "invalid api_key"),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }
}
