pub mod discord;

pub use discord::{DiscordAlertSink, DiscordWebhooks};
