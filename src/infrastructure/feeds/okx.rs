use super::reconnect::{ReconnectMachine, ReconnectPolicy};
use super::sleep_or_shutdown;
use crate::domain::errors::FeedError;
use crate::domain::market::types::{
    FeedEvent, FeedSource, NormalizedSnapshot, NormalizedTick, OrderBookSnapshot, RejectedInput,
    SnapshotPayload, TradeSide,
};
use crate::domain::ports::{EventSink, FeedConnector};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// OKX closes idle connections after 30s; a text ping keeps it open
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Public OKX channels the engine subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OkxChannel {
    Trades,
    Books5,
}

impl OkxChannel {
    pub fn name(&self) -> &'static str {
        match self {
            OkxChannel::Trades => "trades",
            OkxChannel::Books5 => "books5",
        }
    }

    pub fn source(&self) -> FeedSource {
        match self {
            OkxChannel::Trades => FeedSource::OkxTrades,
            OkxChannel::Books5 => FeedSource::OkxOrderBook,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OkxArg {
    pub channel: String,
    #[serde(rename = "instId", default)]
    pub inst_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OkxTrade {
    #[serde(rename = "instId")]
    pub inst_id: String,
    pub px: String,
    pub sz: String,
    pub side: String,
    pub ts: String,
}

/// Depth levels are `[price, size, deprecated, order_count]`.
#[derive(Debug, Clone, Deserialize)]
pub struct OkxBook {
    #[serde(default)]
    pub bids: Vec<Vec<String>>,
    #[serde(default)]
    pub asks: Vec<Vec<String>>,
    pub ts: String,
}

/// Envelope shapes of the public socket: an event (ack or error) or a
/// channel push. The push payload is typed once the channel is known.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireFrame {
    Event {
        event: String,
        arg: Option<OkxArg>,
        #[serde(default)]
        code: String,
        #[serde(default)]
        msg: String,
    },
    Push {
        arg: OkxArg,
        data: serde_json::Value,
    },
}

/// Every message shape the OKX public socket sends us.
#[derive(Debug, Clone)]
pub enum OkxFrame {
    Trades(Vec<OkxTrade>),
    Books { inst_id: String, books: Vec<OkxBook> },
    Subscribed(OkxArg),
    Error { code: String, msg: String },
    Pong,
}

impl OkxFrame {
    pub fn decode(text: &str) -> Result<OkxFrame, String> {
        if text == "pong" {
            return Ok(OkxFrame::Pong);
        }
        let wire: WireFrame =
            serde_json::from_str(text).map_err(|e| format!("unrecognised frame: {}", e))?;

        match wire {
            WireFrame::Event {
                event,
                arg: Some(arg),
                ..
            } if event == "subscribe" => Ok(OkxFrame::Subscribed(arg)),
            WireFrame::Event { event, code, msg, .. } if event == "error" => {
                Ok(OkxFrame::Error { code, msg })
            }
            WireFrame::Event { event, .. } => Err(format!("unexpected event '{}'", event)),
            WireFrame::Push { arg, data } => match arg.channel.as_str() {
                "trades" => serde_json::from_value(data)
                    .map(OkxFrame::Trades)
                    .map_err(|e| format!("bad trades payload: {}", e)),
                "books5" => serde_json::from_value(data)
                    .map(|books| OkxFrame::Books {
                        inst_id: arg.inst_id,
                        books,
                    })
                    .map_err(|e| format!("bad books5 payload: {}", e)),
                other => Err(format!("unsubscribed channel '{}'", other)),
            },
        }
    }

    /// Normalizes one text frame. Acknowledgements produce nothing; anything
    /// malformed comes back as a single rejected event.
    pub fn parse(source: FeedSource, text: &str) -> Vec<FeedEvent> {
        let frame = match OkxFrame::decode(text) {
            Ok(frame) => frame,
            Err(reason) => return vec![FeedEvent::Rejected(RejectedInput::new(source, reason, text))],
        };

        match frame {
            OkxFrame::Trades(trades) => trades
                .iter()
                .map(|t| match normalize_trade(t) {
                    Ok(tick) => FeedEvent::Tick(tick),
                    Err(reason) => FeedEvent::Rejected(RejectedInput::new(source, reason, text)),
                })
                .collect(),
            OkxFrame::Books { inst_id, books } => books
                .iter()
                .map(|b| match normalize_book(&inst_id, b) {
                    Ok(snapshot) => FeedEvent::Snapshot(snapshot),
                    Err(reason) => FeedEvent::Rejected(RejectedInput::new(source, reason, text)),
                })
                .collect(),
            OkxFrame::Error { code, msg } => vec![FeedEvent::Rejected(RejectedInput::new(
                source,
                format!("venue error {}: {}", code, msg),
                text,
            ))],
            OkxFrame::Subscribed(arg) => {
                debug!("OkxFrame: {} subscribed {} {}", source, arg.channel, arg.inst_id);
                Vec::new()
            }
            OkxFrame::Pong => Vec::new(),
        }
    }
}

fn normalize_trade(trade: &OkxTrade) -> Result<NormalizedTick, String> {
    let price: Decimal = trade
        .px
        .parse()
        .map_err(|_| format!("unparseable price '{}'", trade.px))?;
    let size: Decimal = trade
        .sz
        .parse()
        .map_err(|_| format!("unparseable size '{}'", trade.sz))?;
    let side = match trade.side.as_str() {
        "buy" => TradeSide::Buy,
        "sell" => TradeSide::Sell,
        other => return Err(format!("unknown side '{}'", other)),
    };
    let timestamp = trade
        .ts
        .parse::<i64>()
        .map_err(|_| format!("unparseable timestamp '{}'", trade.ts))?;

    Ok(NormalizedTick {
        symbol: trade.inst_id.clone(),
        price,
        size,
        side,
        timestamp,
    })
}

fn parse_levels(levels: &[Vec<String>]) -> Result<Vec<(f64, f64)>, String> {
    levels
        .iter()
        .map(|level| match level.as_slice() {
            [px, sz, ..] => match (px.parse::<f64>(), sz.parse::<f64>()) {
                (Ok(p), Ok(s)) => Ok((p, s)),
                _ => Err(format!("unparseable level {:?}", level)),
            },
            _ => Err(format!("short level {:?}", level)),
        })
        .collect()
}

fn normalize_book(inst_id: &str, book: &OkxBook) -> Result<NormalizedSnapshot, String> {
    let bids = parse_levels(&book.bids)?;
    let asks = parse_levels(&book.asks)?;
    if bids.is_empty() || asks.is_empty() {
        return Err("one-sided book".to_string());
    }
    let timestamp = book
        .ts
        .parse::<i64>()
        .map_err(|_| format!("unparseable timestamp '{}'", book.ts))?;

    Ok(NormalizedSnapshot {
        symbol: inst_id.to_string(),
        timestamp,
        payload: SnapshotPayload::OrderBook(OrderBookSnapshot { bids, asks }),
    })
}

enum StreamEnd {
    Shutdown,
    Closed,
}

/// Streams one OKX public channel for a set of instruments.
pub struct OkxStreamConnector {
    ws_url: String,
    channel: OkxChannel,
    symbols: Vec<String>,
    sink: Arc<dyn EventSink>,
    machine: ReconnectMachine,
    metrics: Metrics,
}

impl OkxStreamConnector {
    pub fn new(
        ws_url: String,
        channel: OkxChannel,
        symbols: Vec<String>,
        sink: Arc<dyn EventSink>,
        policy: ReconnectPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            ws_url,
            channel,
            symbols,
            sink,
            machine: ReconnectMachine::new(policy),
            metrics,
        }
    }

    fn subscribe_message(&self) -> String {
        let args: Vec<serde_json::Value> = self
            .symbols
            .iter()
            .map(|s| serde_json::json!({ "channel": self.channel.name(), "instId": s }))
            .collect();
        serde_json::json!({ "op": "subscribe", "args": args }).to_string()
    }

    async fn connect_and_stream(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, FeedError> {
        let source = self.channel.source();
        let transient = |reason: String| FeedError::TransientNetwork {
            source_name: source.to_string(),
            reason,
        };

        info!("OkxStreamConnector: connecting {} to {}", source, self.ws_url);
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| transient(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(self.subscribe_message().into()))
            .await
            .map_err(|e| transient(format!("subscribe failed: {}", e)))?;

        self.machine.on_connected();
        info!(
            "OkxStreamConnector: {} connected, subscribed {} instrument(s)",
            source,
            self.symbols.len()
        );

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("OkxStreamConnector: {} closing on shutdown", source);
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(StreamEnd::Shutdown);
                    }
                }
                _ = ping.tick() => {
                    write
                        .send(Message::Text("ping".into()))
                        .await
                        .map_err(|e| transient(format!("ping failed: {}", e)))?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        for event in OkxFrame::parse(source, &text) {
                            self.sink.publish(event);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(cf) => info!(
                                "OkxStreamConnector: {} closed by server: Code {} Reason '{}'",
                                source, cf.code, cf.reason
                            ),
                            None => info!("OkxStreamConnector: {} closed by server", source),
                        }
                        return Ok(StreamEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(transient(format!("read error: {}", e))),
                    None => return Ok(StreamEnd::Closed),
                }
            }
        }
    }
}

#[async_trait]
impl FeedConnector for OkxStreamConnector {
    fn source(&self) -> FeedSource {
        self.channel.source()
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let source = self.channel.source();
        url::Url::parse(&self.ws_url).context("Invalid OKX websocket URL")?;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.machine.on_connecting();
            let reason = match self.connect_and_stream(&mut shutdown).await {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::Closed) => "connection closed".to_string(),
                Err(e) => {
                    error!("OkxStreamConnector: {}", e);
                    e.to_string()
                }
            };

            let delay = self.machine.on_failure();
            let delay = self.machine.policy().with_jitter(delay, &mut rand::rng());
            self.metrics.inc_reconnects(source.as_str());
            warn!(
                "OkxStreamConnector: {} disconnected ({}), reconnect #{} in {:.1}s",
                source,
                reason,
                self.machine.total_reconnects(),
                delay.as_secs_f64()
            );
            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        info!("OkxStreamConnector: {} stopped", source);
        Ok(())
    }
}
