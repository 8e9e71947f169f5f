use super::poller::PollSource;
use crate::domain::errors::FeedError;
use crate::domain::market::types::{
    DerivativesSnapshot, FeedEvent, FeedSource, NormalizedSnapshot, RejectedInput, SnapshotPayload,
};
use crate::infrastructure::core::build_url_with_query;
use async_trait::async_trait;
use chrono::Utc;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const COINALYZE_BASE_URL: &str = "https://api.coinalyze.net/v1";
const FUNDING_PERIOD_MS: i64 = 8 * 60 * 60 * 1000;
/// Two five-minute buckets plus slack
const LOOKBACK_SECS: i64 = 15 * 60;

/// `BTC-USDT` -> `BTCUSDT_PERP.A` (USDT-margined perpetual, aggregated across venues).
pub fn coinalyze_symbol(symbol: &str) -> String {
    format!("{}_PERP.A", symbol.replace('-', "").to_uppercase())
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope<T> {
    #[serde(default = "Vec::new")]
    history: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct OiBar {
    t: i64,
    o: f64,
    c: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct LiquidationBar {
    #[serde(default)]
    l: f64,
    #[serde(default)]
    s: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct FundingRow {
    value: f64,
    predicted: Option<f64>,
}

/// Open interest of the last completed bucket: the previous close against the
/// current close when two buckets are available, else the bucket's own open.
fn parse_open_interest(body: &str) -> Result<Option<(f64, f64)>, serde_json::Error> {
    let envelopes: Vec<HistoryEnvelope<OiBar>> = serde_json::from_str(body)?;
    let Some(bars) = envelopes.into_iter().next().map(|e| e.history) else {
        return Ok(None);
    };
    let mut bars = bars;
    bars.sort_by_key(|b| b.t);
    Ok(match bars.as_slice() {
        [.., prev, curr] => Some((prev.c, curr.c)),
        [only] => Some((only.o, only.c)),
        [] => None,
    })
}

/// Funding values are returned in percent.
fn parse_funding(body: &str) -> Result<Option<(f64, f64)>, serde_json::Error> {
    let rows: Vec<FundingRow> = serde_json::from_str(body)?;
    Ok(rows.first().map(|row| {
        let now = row.value / 100.0;
        let next = row.predicted.unwrap_or(row.value) / 100.0;
        (now, next)
    }))
}

/// Long and short liquidation volume summed over the returned buckets.
fn parse_liquidations(body: &str) -> Result<(f64, f64), serde_json::Error> {
    let envelopes: Vec<HistoryEnvelope<LiquidationBar>> = serde_json::from_str(body)?;
    Ok(envelopes
        .iter()
        .flat_map(|e| e.history.iter())
        .fold((0.0, 0.0), |(l, s), bar| (l + bar.l, s + bar.s)))
}

/// Next 00/08/16 UTC funding settlement strictly after `now_ms`.
pub fn next_funding_ts(now_ms: i64) -> i64 {
    (now_ms.div_euclid(FUNDING_PERIOD_MS) + 1) * FUNDING_PERIOD_MS
}

/// Polls open interest, funding and liquidations for each symbol.
pub struct CoinalyzeClient {
    http: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    symbols: Vec<String>,
    interval: Duration,
}

impl CoinalyzeClient {
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
        }
    }

    fn network_error(&self, reason: impl Into<String>) -> FeedError {
        FeedError::TransientNetwork {
            source_name: FeedSource::Coinalyze.to_string(),
            reason: reason.into(),
        }
    }

    async fn get_text(&self, path: &str, params: &[(&str, String)]) -> Result<String, FeedError> {
        let url = build_url_with_query(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| FeedError::Protocol {
                source_name: FeedSource::Coinalyze.to_string(),
                reason: format!("bad url: {}", e),
            })?;
        let resp = self
            .http
            .get(&url)
            .header("api_key", &self.api_key)
            .send()
            .await
            .map_err(|e| self.network_error(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(self.network_error(format!("{} returned {}", path, status)));
        }
        resp.text()
            .await
            .map_err(|e| self.network_error(e.to_string()))
    }

    async fn fetch<T, F>(&self, path: &str, params: &[(&str, String)], parse: F) -> Result<T, String>
    where
        F: FnOnce(&str) -> Result<T, serde_json::Error>,
        T: Send,
    {
        let body = self.get_text(path, params).await.map_err(|e| e.to_string())?;
        parse(&body).map_err(|e| format!("{} payload: {}", path, e))
    }

    async fn poll_symbol(&self, symbol: &str, now_ms: i64) -> Result<DerivativesSnapshot, String> {
        let remote = coinalyze_symbol(symbol);
        let to = now_ms / 1000;
        let window = vec![
            ("symbols", remote.clone()),
            ("interval", "5min".to_string()),
            ("from", (to - LOOKBACK_SECS).to_string()),
            ("to", to.to_string()),
        ];

        let oi = self
            .fetch("/open-interest-history", &window, parse_open_interest)
            .await;
        let funding = self
            .fetch("/funding-rate", &[("symbols", remote.clone())], parse_funding)
            .await;
        let liquidations = self
            .fetch("/liquidation-history", &window, parse_liquidations)
            .await;

        if let (Err(a), Err(b), Err(c)) = (&oi, &funding, &liquidations) {
            return Err(format!("{}: {}; {}; {}", symbol, a, b, c));
        }

        let mut snapshot = DerivativesSnapshot::default();
        match oi {
            Ok(Some((open, close))) => {
                snapshot.oi_open = Some(open);
                snapshot.oi_close = Some(close);
            }
            Ok(None) => debug!("CoinalyzeClient: {} no open interest history", symbol),
            Err(e) => warn!("CoinalyzeClient: {} open interest: {}", symbol, e),
        }
        match funding {
            Ok(Some((now, next))) => {
                snapshot.funding_rate_now = Some(now);
                snapshot.funding_rate_next = Some(next);
                snapshot.next_funding_ts = Some(next_funding_ts(now_ms));
            }
            Ok(None) => debug!("CoinalyzeClient: {} no funding rate", symbol),
            Err(e) => warn!("CoinalyzeClient: {} funding: {}", symbol, e),
        }
        match liquidations {
            Ok((long, short)) => {
                snapshot.liquidations_long = long;
                snapshot.liquidations_short = short;
            }
            Err(e) => warn!("CoinalyzeClient: {} liquidations: {}", symbol, e),
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl PollSource for CoinalyzeClient {
    fn source(&self) -> FeedSource {
        FeedSource::Coinalyze
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&mut self) -> Result<Vec<FeedEvent>, FeedError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut events = Vec::with_capacity(self.symbols.len());
        let mut failures = Vec::new();

        for symbol in &self.symbols {
            match self.poll_symbol(symbol, now_ms).await {
                Ok(snapshot) => events.push(FeedEvent::Snapshot(NormalizedSnapshot {
                    symbol: symbol.clone(),
                    timestamp: now_ms,
                    payload: SnapshotPayload::Derivatives(snapshot),
                })),
                Err(reason) => {
                    events.push(FeedEvent::Rejected(RejectedInput::new(
                        FeedSource::Coinalyze,
                        "all derivatives endpoints failed",
                        symbol,
                    )));
                    failures.push(reason);
                }
            }
        }

        if failures.len() == self.symbols.len() && !self.symbols.is_empty() {
            return Err(self.network_error(failures.join(" | ")));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_symbol_mapping() {
        assert_eq!(coinalyze_symbol("BTC-USDT"), "BTCUSDT_PERP.A");
        assert_eq!(coinalyze_symbol("sol-usdt"), "SOLUSDT_PERP.A");
    }

    #[test]
    fn test_open_interest_uses_last_two_buckets() {
        let body = r#"[{"symbol":"BTCUSDT_PERP.A","history":[
            {"t":1704067500,"o":100.0,"h":110.0,"l":95.0,"c":105.0},
            {"t":1704067200,"o":90.0,"h":101.0,"l":89.0,"c":100.0}]}]"#;
        assert_eq!(parse_open_interest(body).unwrap(), Some((100.0, 105.0)));

        let single = r#"[{"history":[{"t":1,"o":50.0,"h":60.0,"l":40.0,"c":55.0}]}]"#;
        assert_eq!(parse_open_interest(single).unwrap(), Some((50.0, 55.0)));
        assert_eq!(parse_open_interest("[]").unwrap(), None);
    }

    #[test]
    fn test_funding_converted_from_percent() {
        let body = r#"[{"symbol":"BTCUSDT_PERP.A","value":0.01,"predicted":0.02,"update":1704067200000}]"#;
        let (now, next) = parse_funding(body).unwrap().unwrap();
        assert!((now - 0.0001).abs() < 1e-12);
        assert!((next - 0.0002).abs() < 1e-12);

        let no_prediction = r#"[{"value":0.05}]"#;
        let (now, next) = parse_funding(no_prediction).unwrap().unwrap();
        assert_eq!(now, next);
    }

    #[test]
    fn test_liquidations_summed() {
        let body = r#"[{"history":[{"t":1,"l":1000.0,"s":250.0},{"t":2,"l":500.0}]}]"#;
        assert_eq!(parse_liquidations(body).unwrap(), (1500.0, 250.0));
        assert!(parse_liquidations("{oops").is_err());
    }

    #[test]
    fn test_next_funding_boundary() {
        let at = |h: u32, m: u32| {
            Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0)
                .unwrap()
                .timestamp_millis()
        };
        assert_eq!(next_funding_ts(at(7, 59)), at(8, 0));
        assert_eq!(next_funding_ts(at(8, 0)), at(16, 0));
        assert_eq!(
            next_funding_ts(at(23, 30)),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0)
                .unwrap()
                .timestamp_millis()
        );
    }
}
