//! Feed connectors: one task per external source.

pub mod coinalyze;
pub mod coingecko;
pub mod okx;
pub mod poller;
pub mod reconnect;
pub mod whale_alert;

pub use coinalyze::CoinalyzeClient;
pub use coingecko::CoinGeckoClient;
pub use okx::{OkxChannel, OkxFrame, OkxStreamConnector};
pub use poller::{PollSource, PollingConnector};
pub use reconnect::{ConnectionState, ReconnectMachine, ReconnectPolicy};
pub use whale_alert::WhaleAlertClient;

use crate::domain::errors::FeedError;
use crate::domain::market::types::FeedSource;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::watch;

/// Sleeps for `delay` unless shutdown is signalled first. Returns `true` on shutdown.
pub(crate) async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Parses a JSON body, mapping failures onto the feed's protocol error.
pub(crate) fn decode_body<T: DeserializeOwned>(source: FeedSource, body: &str) -> Result<T, FeedError> {
    serde_json::from_str(body).map_err(|e| FeedError::Protocol {
        source_name: source.to_string(),
        reason: e.to_string(),
    })
}
