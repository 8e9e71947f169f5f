use crate::domain::features::{Feature, FeatureVector};
use crate::domain::market::types::{MacroSnapshot, WhaleTransaction};

/// Whale transfers of the symbol's base asset inside the trailing window.
pub fn apply_whales(transfers: &[(i64, WhaleTransaction)], fv: &mut FeatureVector) {
    fv.set(Feature::WhaleTxCount, transfers.len() as f64);
    fv.set(
        Feature::WhaleVolumeUsd,
        transfers.iter().map(|(_, tx)| tx.amount_usd).sum(),
    );
}

pub fn apply_macro(snapshot: &MacroSnapshot, fv: &mut FeatureVector) {
    fv.set(Feature::BtcDominance, snapshot.btc_dominance);
    fv.set(Feature::UsdtDominance, snapshot.usdt_dominance);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whale_totals() {
        let transfers = vec![
            (
                1,
                WhaleTransaction {
                    asset: "btc".to_string(),
                    amount_usd: 750_000.0,
                    hash: "a".to_string(),
                },
            ),
            (
                2,
                WhaleTransaction {
                    asset: "btc".to_string(),
                    amount_usd: 1_250_000.0,
                    hash: "b".to_string(),
                },
            ),
        ];
        let mut fv = FeatureVector::new("e", 0);
        apply_whales(&transfers, &mut fv);
        assert_eq!(fv.get(Feature::WhaleTxCount), 2.0);
        assert_eq!(fv.get(Feature::WhaleVolumeUsd), 2_000_000.0);

        let mut empty = FeatureVector::new("e", 0);
        apply_whales(&[], &mut empty);
        assert_eq!(empty.get(Feature::WhaleTxCount), 0.0);
    }
}
