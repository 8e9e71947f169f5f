// Market data domain
pub mod session;
pub mod timeframe;
pub mod types;
