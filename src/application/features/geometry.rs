use super::to_f64;
use crate::application::detection::wick_detector::wick_ratios;
use crate::domain::features::{Feature, FeatureVector};
use crate::domain::market::types::Candle;
use crate::domain::wick::{WickDirection, WickEvent};
use rust_decimal::Decimal;

/// Wick length on the event's side, in quote currency.
fn wick_length(candle: &Candle, direction: WickDirection) -> Decimal {
    match direction {
        WickDirection::Upper => candle.high - candle.body_top(),
        WickDirection::Lower => candle.body_bottom() - candle.low,
    }
}

fn side_ratio(candle: &Candle, direction: WickDirection, doji_body_fraction: Decimal) -> f64 {
    let ratios = wick_ratios(candle, doji_body_fraction);
    match direction {
        WickDirection::Upper => ratios.upper,
        WickDirection::Lower => ratios.lower,
    }
}

/// Single-candle and multi-candle wick geometry.
///
/// `history` holds the closed candles preceding the event candle, oldest first.
pub fn apply(
    event: &WickEvent,
    history: &[Candle],
    doji_body_fraction: Decimal,
    ratio_threshold: f64,
    fv: &mut FeatureVector,
) {
    let candle = &event.candle;
    let direction = event.direction;
    let ratio = event.wick_ratio;

    fv.set(Feature::WickRatio, ratio);
    fv.set(Feature::CandlesInContext, history.len() as f64);

    let range = to_f64(candle.range());
    let wick = to_f64(wick_length(candle, direction));
    let body = to_f64(candle.body());
    let open = to_f64(candle.open);
    let volume = to_f64(candle.volume);

    if open > 0.0 {
        fv.set(Feature::RangePct, range / open);
    }

    let duration_secs = (candle.close_time - candle.open_time) as f64 / 1000.0;
    if duration_secs > 0.0 {
        fv.set(Feature::RejectionVelocity, wick / duration_secs);
    }

    if range > 0.0 {
        let wick_pct = wick / range;
        fv.set(Feature::WickSizePct, wick_pct);
        fv.set(Feature::BodySizePct, body / range);
        fv.set(Feature::DisplacementIdx, wick_pct * ratio);

        fv.set_flag(
            Feature::FinishedAuction,
            ratio >= 2.0 && volume > 0.0 && wick_pct >= 0.3,
        );
        fv.set_flag(
            Feature::UnfinishedBusiness,
            (1.0..2.0).contains(&ratio) && wick_pct >= 0.2,
        );
        fv.set_flag(Feature::ZeroPrintFlag, volume < 0.001 && wick_pct > 0.1);
    } else {
        fv.set(Feature::WickSizePct, 0.0);
        fv.set(Feature::BodySizePct, 0.0);
        fv.set(Feature::DisplacementIdx, 0.0);
        fv.set_flag(Feature::FinishedAuction, false);
        fv.set_flag(Feature::UnfinishedBusiness, false);
        fv.set_flag(Feature::ZeroPrintFlag, false);
    }

    // Traders on the wick's side are the ones trapped at the extreme
    if volume > 0.0 {
        let trapped = match direction {
            WickDirection::Upper => to_f64(candle.buy_volume),
            WickDirection::Lower => to_f64(candle.sell_volume),
        };
        fv.set(
            Feature::ImbalanceTrapScore,
            (trapped / volume * 100.0 * ratio).min(100.0),
        );
    } else {
        fv.set(Feature::ImbalanceTrapScore, 0.0);
    }

    if history.is_empty() {
        return;
    }

    let prior: Vec<f64> = history
        .iter()
        .map(|c| side_ratio(c, direction, doji_body_fraction))
        .collect();
    let n = prior.len() as f64;
    fv.set(Feature::PriorWickRatioMean, prior.iter().sum::<f64>() / n);
    fv.set(
        Feature::PriorSameSideWicks,
        prior.iter().filter(|r| **r >= ratio_threshold).count() as f64,
    );

    let mean_range = history.iter().map(|c| to_f64(c.range())).sum::<f64>() / n;
    if mean_range > 0.0 {
        fv.set(Feature::RangeExpansion, range / mean_range);
    }
    let mean_volume = history.iter().map(|c| to_f64(c.volume)).sum::<f64>() / n;
    if mean_volume > 0.0 {
        fv.set(Feature::VolumeExpansion, volume / mean_volume);
    }
}
