use rust_decimal::Decimal;
use serde::Serialize;

/// Individual detection criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    WickRatio,
    MinVolume,
    MinPriceMove,
}

/// Outcome of evaluating every configured gate on one candidate wick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GateDecision {
    pub failed: Vec<Gate>,
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Detection gates. All configured gates must pass (strict AND).
///
/// `min_volume` is compared against the candle volume, `min_price_move`
/// against the absolute wick length in quote currency. Unset gates are
/// not evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct GatePolicy {
    pub ratio_threshold: f64,
    pub min_volume: Option<Decimal>,
    pub min_price_move: Option<Decimal>,
}

impl GatePolicy {
    pub fn ratio_only(ratio_threshold: f64) -> Self {
        Self {
            ratio_threshold,
            min_volume: None,
            min_price_move: None,
        }
    }

    /// Evaluates every gate, collecting all failures rather than stopping at the first.
    pub fn evaluate(&self, wick_ratio: f64, wick_length: Decimal, volume: Decimal) -> GateDecision {
        let mut failed = Vec::new();

        if wick_ratio.is_nan() || wick_ratio < self.ratio_threshold {
            failed.push(Gate::WickRatio);
        }
        if let Some(min_volume) = self.min_volume
            && volume < min_volume
        {
            failed.push(Gate::MinVolume);
        }
        if let Some(min_move) = self.min_price_move
            && wick_length < min_move
        {
            failed.push(Gate::MinPriceMove);
        }

        GateDecision { failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ratio_only_policy() {
        let policy = GatePolicy::ratio_only(1.5);
        assert!(policy.evaluate(1.5, dec!(0), dec!(0)).passed());
        assert!(policy.evaluate(9.0, dec!(9), dec!(1)).passed());
        assert_eq!(
            policy.evaluate(1.49, dec!(9), dec!(1)).failed,
            vec![Gate::WickRatio]
        );
    }

    #[test]
    fn test_nan_ratio_never_passes() {
        let policy = GatePolicy::ratio_only(0.0);
        assert!(!policy.evaluate(f64::NAN, dec!(1), dec!(1)).passed());
    }

    #[test]
    fn test_all_gates_are_and_combined() {
        let policy = GatePolicy {
            ratio_threshold: 1.5,
            min_volume: Some(dec!(10)),
            min_price_move: Some(dec!(5)),
        };
        assert!(policy.evaluate(2.0, dec!(5), dec!(10)).passed());

        // Ratio alone is not enough
        let decision = policy.evaluate(9.0, dec!(5), dec!(9.99));
        assert_eq!(decision.failed, vec![Gate::MinVolume]);

        let decision = policy.evaluate(9.0, dec!(4.5), dec!(100));
        assert_eq!(decision.failed, vec![Gate::MinPriceMove]);

        let decision = policy.evaluate(1.0, dec!(1), dec!(1));
        assert_eq!(
            decision.failed,
            vec![Gate::WickRatio, Gate::MinVolume, Gate::MinPriceMove]
        );
    }
}
