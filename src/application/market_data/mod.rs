// Market data processing modules
pub mod candle_aggregator;
pub mod snapshot_store;
pub mod trade_stats;
