use crate::domain::errors::AlertError;
use crate::domain::ports::AlertSink;
use crate::domain::storage::AlertSummary;
use crate::domain::wick::WickDirection;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::{Value, json};
use tracing::debug;

const USERNAME: &str = "ALPHA Wick Engine";
const COLOR_LOWER: u32 = 0x00FF00;
const COLOR_UPPER: u32 = 0xFF0000;

/// Webhook URLs: one general channel plus optional per-asset channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscordWebhooks {
    pub general: Option<String>,
    pub btc: Option<String>,
    pub eth: Option<String>,
    pub sol: Option<String>,
}

impl DiscordWebhooks {
    pub fn is_empty(&self) -> bool {
        self.general.is_none() && self.btc.is_none() && self.eth.is_none() && self.sol.is_none()
    }

    /// Asset channel for the symbol's base asset, falling back to general.
    pub fn route(&self, symbol: &str) -> Option<&str> {
        let asset_channel = match symbol.split('-').next().unwrap_or(symbol) {
            "BTC" => self.btc.as_deref(),
            "ETH" => self.eth.as_deref(),
            "SOL" => self.sol.as_deref(),
            _ => None,
        };
        asset_channel.or(self.general.as_deref())
    }
}

/// Builds the embed payload for one alert.
pub fn embed_payload(summary: &AlertSummary) -> Value {
    let (label, color) = match summary.direction {
        WickDirection::Upper => ("UPPER", COLOR_UPPER),
        WickDirection::Lower => ("LOWER", COLOR_LOWER),
    };

    let mut fields = vec![
        json!({ "name": "High", "value": format!("${:.2}", summary.high), "inline": true }),
        json!({ "name": "Low", "value": format!("${:.2}", summary.low), "inline": true }),
        json!({ "name": "Wick Ratio", "value": format!("{:.2}", summary.wick_ratio), "inline": true }),
    ];
    fields.extend(summary.top_features.iter().filter(|(name, _)| name != "wick_ratio").map(
        |(name, value)| json!({ "name": name, "value": format!("{:.4}", value), "inline": true }),
    ));

    let timestamp = Utc
        .timestamp_millis_opt(summary.timestamp)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    json!({
        "username": USERNAME,
        "embeds": [{
            "title": format!("{} WICK - {} ({})", label, summary.symbol, summary.timeframe),
            "color": color,
            "timestamp": timestamp,
            "fields": fields,
            "footer": { "text": format!("{} | #{}", USERNAME, summary.sequence_id) },
        }],
    })
}

pub struct DiscordAlertSink {
    http: ClientWithMiddleware,
    webhooks: DiscordWebhooks,
}

impl DiscordAlertSink {
    pub fn new(http: ClientWithMiddleware, webhooks: DiscordWebhooks) -> Self {
        Self { http, webhooks }
    }
}

#[async_trait]
impl AlertSink for DiscordAlertSink {
    async fn deliver(&self, summary: &AlertSummary) -> Result<(), AlertError> {
        let Some(url) = self.webhooks.route(&summary.symbol) else {
            debug!("DiscordAlertSink: no webhook for {}, skipping", summary.symbol);
            return Ok(());
        };

        let body = serde_json::to_vec(&embed_payload(summary))
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(AlertError::RateLimited);
        }
        if !status.is_success() {
            return Err(AlertError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
