use rust_decimal::Decimal;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by feed connectors. Never fatal: connectors retry with backoff.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Transient network error on {source_name}: {reason}")]
    TransientNetwork { source_name: String, reason: String },

    #[error("Protocol error on {source_name}: {reason}")]
    Protocol { source_name: String, reason: String },
}

/// Reasons a tick is refused before aggregation. The tick is dropped and counted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Non-positive price {price} for {symbol}")]
    NonPositivePrice { symbol: String, price: Decimal },

    #[error("Negative size {size} for {symbol}")]
    NegativeSize { symbol: String, size: Decimal },

    #[error("Unrecognized symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("Out-of-order tick for {symbol}: {lag_ms}ms behind latest (tolerance {tolerance_ms}ms)")]
    OutOfOrder {
        symbol: String,
        lag_ms: i64,
        tolerance_ms: i64,
    },
}

impl ValidationError {
    /// Metric label for this rejection reason
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::NonPositivePrice { .. } => "non_positive_price",
            ValidationError::NegativeSize { .. } => "negative_size",
            ValidationError::UnknownSymbol { .. } => "unknown_symbol",
            ValidationError::OutOfOrder { .. } => "out_of_order",
        }
    }
}

/// A context input was missing or too old; dependent features fall back to the sentinel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StaleDataError {
    #[error("No {input} data available")]
    Missing { input: &'static str },

    #[error("{input} data is stale: age {age_ms}ms > limit {limit_ms}ms")]
    Stale {
        input: &'static str,
        age_ms: i64,
        limit_ms: i64,
    },
}

impl StaleDataError {
    pub fn input(&self) -> &'static str {
        match self {
            StaleDataError::Missing { input } | StaleDataError::Stale { input, .. } => input,
        }
    }
}

/// Errors from the durable record writer. `Exhausted` is fatal for the output file.
#[derive(Debug, Error)]
pub enum StorageWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Write to {path:?} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },
}

/// Invalid or missing settings. Only ever raised at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required setting {key}")]
    Missing { key: &'static str },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Delivery failures of the alert sink. Retried, never propagated to storage.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Webhook rejected alert with status {status}")]
    Rejected { status: u16 },

    #[error("Webhook rate limited")]
    RateLimited,

    #[error("Webhook transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validation_error_formatting() {
        let err = ValidationError::NonPositivePrice {
            symbol: "BTC-USDT".to_string(),
            price: dec!(-1.5),
        };
        let msg = err.to_string();
        assert!(msg.contains("BTC-USDT"));
        assert!(msg.contains("-1.5"));
        assert_eq!(err.reason(), "non_positive_price");
    }

    #[test]
    fn test_stale_error_formatting() {
        let err = StaleDataError::Stale {
            input: "derivatives",
            age_ms: 400_000,
            limit_ms: 300_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("400000"));
        assert!(msg.contains("300000"));
        assert_eq!(err.input(), "derivatives");
    }

    #[test]
    fn test_storage_error_from_io() {
        let io = std::io::Error::other("disk full");
        let err: StorageWriteError = io.into();
        assert!(err.to_string().contains("disk full"));
    }
}
