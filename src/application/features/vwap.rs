use crate::application::market_data::trade_stats::VwapSnapshot;
use crate::domain::features::{Feature, FeatureVector};

/// |z| at which the mean-reversion score saturates
const FULL_SCORE_SIGMA: f64 = 3.0;

/// VWAP-relative position of `price` (the event candle's close).
///
/// Distances are fractions of the reference price. The mean-reversion score
/// is positive when price sits below VWAP and negative above it.
pub fn apply(stats: &VwapSnapshot, price: f64, fv: &mut FeatureVector) {
    let distance = |reference: Option<f64>| reference.filter(|r| *r > 0.0).map(|r| (price - r) / r);

    if let Some(d) = distance(stats.rolling_vwap) {
        fv.set(Feature::RollingVwapDistance, d);
    }
    if let Some(d) = distance(stats.session_vwap) {
        fv.set(Feature::SessionVwapDistance, d);
    }
    if let Some(d) = distance(stats.session_high) {
        fv.set(Feature::SessionHighDistance, d);
    }
    if let Some(d) = distance(stats.session_low) {
        fv.set(Feature::SessionLowDistance, d);
    }

    if let (Some(vwap), Some(std_dev)) = (stats.rolling_vwap, stats.rolling_std) {
        if std_dev > 0.0 {
            let z = (price - vwap) / std_dev;
            fv.set(Feature::VwapZscore, z);
            fv.set_flag(Feature::VwapBand1sd, z.abs() >= 1.0);
            fv.set_flag(Feature::VwapBand2sd, z.abs() >= 2.0);
            let magnitude = (z.abs() / FULL_SCORE_SIGMA * 100.0).min(100.0);
            fv.set(
                Feature::VwapMeanReversionScore,
                if z < 0.0 { magnitude } else { -magnitude },
            );
        } else {
            fv.set(Feature::VwapZscore, 0.0);
            fv.set_flag(Feature::VwapBand1sd, false);
            fv.set_flag(Feature::VwapBand2sd, false);
            fv.set(Feature::VwapMeanReversionScore, 0.0);
        }
    }
}
