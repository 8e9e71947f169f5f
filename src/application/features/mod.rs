//! Feature extraction around detected wicks.
//!
//! Each group writes its own slice of the [`FeatureVector`](crate::domain::features::FeatureVector);
//! [`extractor::StandardFeatureExtractor`] wires them together.

pub mod derivatives;
pub mod extractor;
pub mod geometry;
pub mod liquidity;
pub mod orderflow;
pub mod session;
pub mod vwap;
pub mod whale;

pub use extractor::{
    ContextLimits, Extraction, ExtractorConfig, FeatureContext, FeatureExtractor,
    StandardFeatureExtractor,
};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Lossy conversion at the boundary between exact prices and float features.
/// Unrepresentable values become NaN, which the vector stores as the sentinel.
pub(crate) fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}
