//! Alert delivery configuration parsing from environment variables.

use super::{optional_string, parse_env};
use crate::domain::errors::ConfigurationError;
use crate::infrastructure::webhook::DiscordWebhooks;

/// Alert environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEnvConfig {
    pub webhooks: DiscordWebhooks,
    pub cooldown_secs: u64,
    pub top_features: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
}

impl Default for AlertEnvConfig {
    fn default() -> Self {
        Self {
            webhooks: DiscordWebhooks::default(),
            cooldown_secs: 300,
            top_features: 5,
            queue_capacity: 64,
            max_attempts: 3,
        }
    }
}

impl AlertEnvConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let defaults = Self::default();
        Ok(Self {
            webhooks: DiscordWebhooks {
                general: optional_string("DISCORD_WEBHOOK_GENERAL"),
                btc: optional_string("DISCORD_WEBHOOK_BTC"),
                eth: optional_string("DISCORD_WEBHOOK_ETH"),
                sol: optional_string("DISCORD_WEBHOOK_SOL"),
            },
            cooldown_secs: parse_env("ALERT_COOLDOWN_SECS", defaults.cooldown_secs)?,
            top_features: parse_env("ALERT_TOP_FEATURES", defaults.top_features)?,
            queue_capacity: parse_env("ALERT_QUEUE_CAPACITY", defaults.queue_capacity)?,
            max_attempts: parse_env("ALERT_MAX_ATTEMPTS", defaults.max_attempts)?,
        })
    }

    pub fn enabled(&self) -> bool {
        !self.webhooks.is_empty()
    }
}
