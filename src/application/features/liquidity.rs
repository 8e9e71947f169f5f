use crate::domain::features::{Feature, FeatureVector};
use crate::domain::market::types::OrderBookSnapshot;

const DEPTH_LEVELS: usize = 5;
/// A gap between adjacent levels this many times the smallest gap is a void
const VOID_GAP_MULTIPLE: f64 = 5.0;
/// Depth ratio between sides that counts as stacked
const STACKED_RATIO: f64 = 3.0;

/// Liquidity features from the orderbook in force at event time.
pub fn apply(book: &OrderBookSnapshot, age_ms: i64, fv: &mut FeatureVector) {
    fv.set(Feature::OrderbookAgeMs, age_ms as f64);

    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        let spread = ask - bid;
        fv.set(Feature::Spread, spread);
        let mid = (ask + bid) / 2.0;
        if mid > 0.0 {
            fv.set(Feature::SpreadBps, spread / mid * 10_000.0);
        }
    }

    fv.set(
        Feature::L1DepthBid,
        book.bids.first().map(|(_, s)| *s).unwrap_or(0.0),
    );
    fv.set(
        Feature::L1DepthAsk,
        book.asks.first().map(|(_, s)| *s).unwrap_or(0.0),
    );

    let l5_bid: f64 = book.bids.iter().take(DEPTH_LEVELS).map(|(_, s)| s).sum();
    let l5_ask: f64 = book.asks.iter().take(DEPTH_LEVELS).map(|(_, s)| s).sum();
    fv.set(Feature::L5DepthBid, l5_bid);
    fv.set(Feature::L5DepthAsk, l5_ask);

    let total = l5_bid + l5_ask;
    fv.set(
        Feature::DepthImbalance,
        if total > 0.0 {
            (l5_bid - l5_ask) / total
        } else {
            0.0
        },
    );

    fv.set_flag(Feature::LiquidityVoidFlag, has_liquidity_void(book));
    fv.set_flag(Feature::StackedImbalanceFlag, is_stacked(l5_bid, l5_ask));
}

fn has_liquidity_void(book: &OrderBookSnapshot) -> bool {
    let bid_gaps = book.bids.windows(2).map(|w| w[0].0 - w[1].0);
    let ask_gaps = book.asks.windows(2).map(|w| w[1].0 - w[0].0);
    let gaps: Vec<f64> = bid_gaps.chain(ask_gaps).filter(|g| *g > 0.0).collect();

    if gaps.len() < 2 {
        return false;
    }
    let min = gaps.iter().copied().fold(f64::INFINITY, f64::min);
    let max = gaps.iter().copied().fold(0.0, f64::max);
    min > 0.0 && max >= VOID_GAP_MULTIPLE * min
}

fn is_stacked(bid_depth: f64, ask_depth: f64) -> bool {
    match (bid_depth > 0.0, ask_depth > 0.0) {
        (false, false) => false,
        (true, false) | (false, true) => true,
        (true, true) => (bid_depth / ask_depth).max(ask_depth / bid_depth) >= STACKED_RATIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OrderBookSnapshot {
        OrderBookSnapshot {
            bids: vec![
                (99.9, 2.0),
                (99.8, 1.0),
                (99.7, 1.0),
                (99.6, 1.0),
                (99.5, 1.0),
            ],
            asks: vec![
                (100.1, 1.0),
                (100.2, 1.0),
                (100.3, 1.0),
                (100.4, 1.0),
                (100.5, 1.0),
            ],
        }
    }

    #[test]
    fn test_depth_and_spread() {
        let mut fv = FeatureVector::new("e", 0);
        apply(&book(), 1_500, &mut fv);
        assert!((fv.get(Feature::Spread) - 0.2).abs() < 1e-9);
        assert!((fv.get(Feature::SpreadBps) - 20.0).abs() < 1e-6);
        assert_eq!(fv.get(Feature::L1DepthBid), 2.0);
        assert_eq!(fv.get(Feature::L5DepthBid), 6.0);
        assert_eq!(fv.get(Feature::L5DepthAsk), 5.0);
        assert!((fv.get(Feature::DepthImbalance) - 1.0 / 11.0).abs() < 1e-12);
        assert_eq!(fv.get(Feature::LiquidityVoidFlag), 0.0);
        assert_eq!(fv.get(Feature::StackedImbalanceFlag), 0.0);
        assert_eq!(fv.get(Feature::OrderbookAgeMs), 1_500.0);
    }

    #[test]
    fn test_liquidity_void_detected() {
        let mut b = book();
        b.asks[4].0 = 101.5;
        let mut fv = FeatureVector::new("e", 0);
        apply(&b, 0, &mut fv);
        assert_eq!(fv.get(Feature::LiquidityVoidFlag), 1.0);
    }

    #[test]
    fn test_stacked_imbalance() {
        assert!(is_stacked(9.0, 3.0));
        assert!(!is_stacked(5.0, 3.0));
        assert!(is_stacked(1.0, 0.0));
        assert!(!is_stacked(0.0, 0.0));
    }
}
