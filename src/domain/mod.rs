// Market data domain: ticks, snapshots, candles
pub mod market;

// Wick events
pub mod wick;

// Versioned feature schema
pub mod features;

// Persisted record layout
pub mod storage;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
