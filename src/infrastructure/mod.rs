// Feed connectors and reconnection
pub mod feeds;

// Durable JSONL record storage
pub mod storage;

// Discord webhook alert sink
pub mod webhook;

// Shared HTTP plumbing
pub mod core;

// Metrics and push-based reporting
pub mod observability;
