use super::to_f64;
use crate::domain::features::{Feature, FeatureVector};
use crate::domain::market::types::Candle;
use statrs::statistics::{Data, Distribution};

const CVD_POINTS: usize = 10;
/// Prior candles needed before frequency-based features are meaningful
const MIN_FREQUENCY_SAMPLES: usize = 5;

/// Order flow from the side-split volume of the event candle and its predecessors.
pub fn apply(candle: &Candle, history: &[Candle], fv: &mut FeatureVector) {
    let delta = to_f64(candle.delta());
    let price_change = to_f64(candle.close - candle.open);
    let volume = to_f64(candle.volume);

    fv.set(Feature::DeltaAtWick, delta);
    if let Some(prev) = history.last() {
        fv.set(Feature::DeltaPrevCandle, to_f64(prev.delta()));
    }
    fv.set_flag(
        Feature::DeltaDivergenceFlag,
        (price_change > 0.0 && delta < 0.0) || (price_change < 0.0 && delta > 0.0),
    );
    if volume > 0.0 {
        fv.set(Feature::BuyVolumeRatio, to_f64(candle.buy_volume) / volume);
    }

    let deltas: Vec<f64> = history
        .iter()
        .chain(std::iter::once(candle))
        .map(|c| to_f64(c.delta()))
        .collect();

    let cvd: Vec<f64> = deltas
        .iter()
        .scan(0.0, |acc, d| {
            *acc += d;
            Some(*acc)
        })
        .collect();
    let recent_cvd = &cvd[cvd.len().saturating_sub(CVD_POINTS)..];
    if let Some(slope) = slope(recent_cvd) {
        fv.set(Feature::CvdSlope10, slope);
    }

    fv.set_flag(Feature::ExhaustionFlag, is_exhausted(&deltas, price_change));

    if history.len() >= MIN_FREQUENCY_SAMPLES {
        let counts: Vec<f64> = history.iter().map(|c| f64::from(c.trade_count)).collect();
        let data = Data::new(counts);
        let current = f64::from(candle.trade_count);
        if let (Some(mean), Some(std_dev)) = (data.mean(), data.std_dev()) {
            let z = if std_dev > 0.0 {
                (current - mean) / std_dev
            } else {
                0.0
            };
            fv.set(Feature::TradeFrequencySpike, z);

            let range = to_f64(candle.range());
            let absorbed = range > 0.0
                && current > mean * 2.0
                && price_change.abs() / range < 0.3;
            fv.set_flag(Feature::AbsorptionFlag, absorbed);
        }
    }
}

/// Least-squares slope of `values` against their index.
fn slope(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    (den > 0.0).then(|| num / den)
}

/// The last three deltas push in the price direction with shrinking magnitude.
fn is_exhausted(deltas: &[f64], price_change: f64) -> bool {
    let [.., a, b, c] = deltas else {
        return false;
    };
    [a, b, c].iter().all(|d| **d * price_change > 0.0) && c.abs() < b.abs() && b.abs() < a.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::MISSING_FEATURE;
    use crate::domain::market::timeframe::Timeframe;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, close: Decimal, buy: Decimal, sell: Decimal, trades: u32) -> Candle {
        Candle {
            symbol: "BTC-USDT".to_string(),
            timeframe: Timeframe::OneMin,
            open,
            high: open.max(close) + dec!(1),
            low: open.min(close) - dec!(1),
            close,
            volume: buy + sell,
            buy_volume: buy,
            sell_volume: sell,
            trade_count: trades,
            open_time: 0,
            close_time: 60_000,
        }
    }

    #[test]
    fn test_slope_of_linear_series() {
        assert_eq!(slope(&[1.0, 3.0, 5.0, 7.0]), Some(2.0));
        assert_eq!(slope(&[4.0]), None);
    }

    #[test]
    fn test_delta_and_divergence() {
        // Price up, sellers dominant
        let c = candle(dec!(100), dec!(102), dec!(2), dec!(5), 10);
        let mut fv = FeatureVector::new("e", 0);
        apply(&c, &[], &mut fv);
        assert_eq!(fv.get(Feature::DeltaAtWick), -3.0);
        assert_eq!(fv.get(Feature::DeltaDivergenceFlag), 1.0);
        assert_eq!(fv.get(Feature::DeltaPrevCandle), MISSING_FEATURE);
        assert!((fv.get(Feature::BuyVolumeRatio) - 2.0 / 7.0).abs() < 1e-12);
        // Not enough history for frequency statistics
        assert_eq!(fv.get(Feature::TradeFrequencySpike), MISSING_FEATURE);
        assert_eq!(fv.get(Feature::CvdSlope10), MISSING_FEATURE);
    }

    #[test]
    fn test_cvd_slope_and_exhaustion() {
        // Rising price with buy delta 5, 3, 1: exhausting
        let history = vec![
            candle(dec!(100), dec!(101), dec!(6), dec!(1), 10),
            candle(dec!(101), dec!(102), dec!(4), dec!(1), 10),
        ];
        let c = candle(dec!(102), dec!(103), dec!(2), dec!(1), 10);
        let mut fv = FeatureVector::new("e", 0);
        apply(&c, &history, &mut fv);
        assert_eq!(fv.get(Feature::ExhaustionFlag), 1.0);
        assert_eq!(fv.get(Feature::DeltaPrevCandle), 3.0);
        // CVD 5, 8, 9 -> slope 2
        assert!((fv.get(Feature::CvdSlope10) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_trade_frequency_spike_and_absorption() {
        let history: Vec<Candle> = [10, 12, 8, 10, 12, 8]
            .iter()
            .map(|n| candle(dec!(100), dec!(101), dec!(1), dec!(1), *n))
            .collect();
        // Flat candle with a burst of trades
        let c = candle(dec!(100), dec!(100.1), dec!(20), dec!(20), 40);
        let mut fv = FeatureVector::new("e", 0);
        apply(&c, &history, &mut fv);
        assert!(fv.get(Feature::TradeFrequencySpike) > 3.0);
        assert_eq!(fv.get(Feature::AbsorptionFlag), 1.0);
    }
}
