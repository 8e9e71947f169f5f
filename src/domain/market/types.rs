use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::timeframe::Timeframe;

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

/// External source a connector talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    OkxTrades,
    OkxOrderBook,
    Coinalyze,
    CoinGecko,
    WhaleAlert,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::OkxTrades => "okx_trades",
            FeedSource::OkxOrderBook => "okx_orderbook",
            FeedSource::Coinalyze => "coinalyze",
            FeedSource::CoinGecko => "coingecko",
            FeedSource::WhaleAlert => "whale_alert",
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trade print in venue-independent form. Consumed immediately by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTick {
    pub symbol: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: TradeSide,
    /// Exchange timestamp, epoch milliseconds
    pub timestamp: i64,
}

/// Top-of-book depth, bids descending and asks ascending by price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }

    pub fn mid_price(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }
}

/// Open interest, funding and liquidation state from one derivatives poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivativesSnapshot {
    pub oi_open: Option<f64>,
    pub oi_close: Option<f64>,
    pub funding_rate_now: Option<f64>,
    pub funding_rate_next: Option<f64>,
    /// Next funding settlement, epoch ms
    pub next_funding_ts: Option<i64>,
    pub liquidations_long: f64,
    pub liquidations_short: f64,
}

/// A single large on-chain transfer of the symbol's base asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhaleTransaction {
    pub asset: String,
    pub amount_usd: f64,
    pub hash: String,
}

/// Market-wide dominance figures (percent of total market cap).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroSnapshot {
    pub btc_dominance: f64,
    pub usdt_dominance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotPayload {
    OrderBook(OrderBookSnapshot),
    Derivatives(DerivativesSnapshot),
    Whale(WhaleTransaction),
    Macro(MacroSnapshot),
}

impl SnapshotPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotPayload::OrderBook(_) => "orderbook",
            SnapshotPayload::Derivatives(_) => "derivatives",
            SnapshotPayload::Whale(_) => "whale",
            SnapshotPayload::Macro(_) => "macro",
        }
    }
}

/// Symbol used for snapshots that apply to every instrument (macro data).
pub const MARKET_WIDE: &str = "*";

/// Cached context data. Latest-wins per (symbol, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSnapshot {
    pub symbol: String,
    pub timestamp: i64,
    pub payload: SnapshotPayload,
}

/// Input a connector could not turn into a common event.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedInput {
    pub source: FeedSource,
    pub reason: String,
    pub raw: String,
}

impl RejectedInput {
    const MAX_RAW_LEN: usize = 256;

    pub fn new(source: FeedSource, reason: impl Into<String>, raw: &str) -> Self {
        let raw = match raw.char_indices().nth(Self::MAX_RAW_LEN) {
            Some((idx, _)) => format!("{}...", &raw[..idx]),
            None => raw.to_string(),
        };
        Self {
            source,
            reason: reason.into(),
            raw,
        }
    }
}

/// Output of every connector's normalize step.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(NormalizedTick),
    Snapshot(NormalizedSnapshot),
    Rejected(RejectedInput),
}

/// OHLCV summary over one wall-clock window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub trade_count: u32,
    /// Window start, epoch ms
    pub open_time: i64,
    /// Window end (exclusive), epoch ms
    pub close_time: i64,
}

impl Candle {
    pub fn body_top(&self) -> Decimal {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> Decimal {
        self.open.min(self.close)
    }

    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn delta(&self) -> Decimal {
        self.buy_volume - self.sell_volume
    }

    /// low <= min(open, close) <= max(open, close) <= high
    pub fn is_consistent(&self) -> bool {
        self.low <= self.body_bottom()
            && self.body_top() <= self.high
            && self.open_time <= self.close_time
    }
}
