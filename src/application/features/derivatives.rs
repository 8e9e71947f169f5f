use crate::domain::features::{Feature, FeatureVector};
use crate::domain::market::types::DerivativesSnapshot;

/// Liquidated volume in the lookback window above which the flag is raised
const LIQUIDATION_FLAG_THRESHOLD: f64 = 1.0;

/// Open interest, liquidation and funding features from the latest
/// derivatives poll that is not older than the staleness bound.
pub fn apply(snapshot: &DerivativesSnapshot, age_ms: i64, event_time: i64, fv: &mut FeatureVector) {
    fv.set(Feature::DerivativesAgeMs, age_ms as f64);

    if let (Some(open), Some(close)) = (snapshot.oi_open, snapshot.oi_close)
        && open > 0.0
    {
        fv.set(Feature::OiChangePct, (close - open) / open);
        let direction = if close > open {
            1.0
        } else if close < open {
            -1.0
        } else {
            0.0
        };
        fv.set(Feature::OiDirection, direction);
    }

    let density = snapshot.liquidations_long + snapshot.liquidations_short;
    fv.set(Feature::LiquidationDensity, density);
    fv.set_flag(Feature::LiquidationFlag, density > LIQUIDATION_FLAG_THRESHOLD);

    if let Some(now) = snapshot.funding_rate_now {
        fv.set(Feature::FundingRateNow, now);
    }
    if let Some(next) = snapshot.funding_rate_next {
        fv.set(Feature::FundingRateNext, next);
    }
    if let Some(next_ts) = snapshot.next_funding_ts
        && next_ts > event_time
    {
        fv.set(
            Feature::MinutesToFunding,
            (next_ts - event_time) as f64 / 60_000.0,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::MISSING_FEATURE;

    #[test]
    fn test_open_interest_and_liquidations() {
        let snap = DerivativesSnapshot {
            oi_open: Some(1_000.0),
            oi_close: Some(950.0),
            funding_rate_now: Some(0.0001),
            funding_rate_next: None,
            next_funding_ts: Some(3_600_000),
            liquidations_long: 1.5,
            liquidations_short: 0.25,
        };
        let mut fv = FeatureVector::new("e", 0);
        apply(&snap, 20_000, 1_800_000, &mut fv);

        assert!((fv.get(Feature::OiChangePct) + 0.05).abs() < 1e-12);
        assert_eq!(fv.get(Feature::OiDirection), -1.0);
        assert_eq!(fv.get(Feature::LiquidationDensity), 1.75);
        assert_eq!(fv.get(Feature::LiquidationFlag), 1.0);
        assert_eq!(fv.get(Feature::FundingRateNow), 0.0001);
        assert_eq!(fv.get(Feature::FundingRateNext), MISSING_FEATURE);
        assert_eq!(fv.get(Feature::MinutesToFunding), 30.0);
        assert_eq!(fv.get(Feature::DerivativesAgeMs), 20_000.0);
    }

    #[test]
    fn test_flat_open_interest_and_past_funding() {
        let snap = DerivativesSnapshot {
            oi_open: Some(10.0),
            oi_close: Some(10.0),
            next_funding_ts: Some(1_000),
            ..Default::default()
        };
        let mut fv = FeatureVector::new("e", 0);
        apply(&snap, 0, 5_000, &mut fv);
        assert_eq!(fv.get(Feature::OiDirection), 0.0);
        assert_eq!(fv.get(Feature::LiquidationFlag), 0.0);
        assert_eq!(fv.get(Feature::MinutesToFunding), MISSING_FEATURE);
    }
}
