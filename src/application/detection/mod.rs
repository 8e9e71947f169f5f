// Wick detection over closed candles
pub mod gate_policy;
pub mod wick_detector;

pub use gate_policy::{Gate, GateDecision, GatePolicy};
pub use wick_detector::{DetectorState, WickDetector};
