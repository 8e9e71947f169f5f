// Tick validation
pub mod validation;

// Candle aggregation, context snapshots, rolling trade statistics
pub mod market_data;

// Wick detection and gating
pub mod detection;

// Feature extraction
pub mod features;

// Synchronous detection core and the tasks driving it
pub mod pipeline;

// Alert delivery off the storage path
pub mod alerts;

// System orchestrator
pub mod system;
