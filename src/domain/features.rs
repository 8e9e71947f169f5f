//! Fixed, versioned feature schema.
//!
//! Every [`FeatureVector`] carries a value for every [`Feature`], in schema
//! order. Inputs that were unavailable resolve to [`MISSING_FEATURE`] so that
//! stored records stay tabular across runs.

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Bumped whenever a feature is added, removed or changes meaning.
pub const FEATURE_SCHEMA_VERSION: u16 = 1;

/// Placeholder for a feature whose input was missing or stale.
pub const MISSING_FEATURE: f64 = -9999.0;

macro_rules! feature_schema {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Feature keys of the current schema, in serialization order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Feature {
            $($variant),+
        }

        impl Feature {
            pub const ALL: &'static [Feature] = &[$(Feature::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Feature::$variant => $name),+
                }
            }
        }
    };
}

feature_schema! {
    // Wick geometry
    WickRatio => "wick_ratio",
    WickSizePct => "wick_size_pct",
    BodySizePct => "body_size_pct",
    RangePct => "range_pct",
    RejectionVelocity => "rejection_velocity",
    DisplacementIdx => "displacement_idx",
    ImbalanceTrapScore => "imbalance_trap_score",
    FinishedAuction => "finished_auction",
    UnfinishedBusiness => "unfinished_business",
    ZeroPrintFlag => "zero_print_flag",
    PriorWickRatioMean => "prior_wick_ratio_mean",
    PriorSameSideWicks => "prior_same_side_wicks",
    RangeExpansion => "range_expansion",
    VolumeExpansion => "volume_expansion",
    CandlesInContext => "candles_in_context",
    // Order flow
    DeltaAtWick => "delta_at_wick",
    DeltaPrevCandle => "delta_prev_candle",
    DeltaDivergenceFlag => "delta_divergence_flag",
    CvdSlope10 => "cvd_slope_10",
    ExhaustionFlag => "exhaustion_flag",
    AbsorptionFlag => "absorption_flag",
    TradeFrequencySpike => "trade_frequency_spike",
    BuyVolumeRatio => "buy_volume_ratio",
    // Liquidity
    Spread => "spread",
    SpreadBps => "spread_bps",
    L1DepthBid => "l1_depth_bid",
    L1DepthAsk => "l1_depth_ask",
    L5DepthBid => "l5_depth_bid",
    L5DepthAsk => "l5_depth_ask",
    DepthImbalance => "depth_imbalance",
    LiquidityVoidFlag => "liquidity_void_flag",
    StackedImbalanceFlag => "stacked_imbalance_flag",
    OrderbookAgeMs => "orderbook_age_ms",
    // Derivatives
    OiChangePct => "oi_change_pct",
    OiDirection => "oi_direction",
    LiquidationDensity => "liquidation_density",
    LiquidationFlag => "liquidation_flag",
    FundingRateNow => "funding_rate_now",
    FundingRateNext => "funding_rate_next",
    MinutesToFunding => "minutes_to_funding",
    DerivativesAgeMs => "derivatives_age_ms",
    // VWAP
    RollingVwapDistance => "rolling_vwap_distance",
    SessionVwapDistance => "session_vwap_distance",
    VwapZscore => "vwap_zscore",
    VwapBand1sd => "vwap_band_1sd",
    VwapBand2sd => "vwap_band_2sd",
    VwapMeanReversionScore => "vwap_mean_reversion_score",
    SessionHighDistance => "session_high_distance",
    SessionLowDistance => "session_low_distance",
    // Session
    SessionCode => "session_code",
    MinutesIntoSession => "minutes_into_session",
    MinutesUntilSessionClose => "minutes_until_session_close",
    HourOfDay => "hour_of_day",
    DayOfWeek => "day_of_week",
    WeekendFlag => "weekend_flag",
    CmeCloseProximity => "cme_close_proximity",
    // Whale / macro
    WhaleTxCount => "whale_tx_count",
    WhaleVolumeUsd => "whale_volume_usd",
    BtcDominance => "btc_dominance",
    UsdtDominance => "usdt_dominance",
}

pub const FEATURE_COUNT: usize = Feature::ALL.len();

impl Feature {
    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature values for one wick event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub event_id: String,
    pub schema_version: u16,
    pub computed_at: i64,
    #[serde(with = "feature_values")]
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    /// A vector with every feature set to the sentinel.
    pub fn new(event_id: impl Into<String>, computed_at: i64) -> Self {
        Self {
            event_id: event_id.into(),
            schema_version: FEATURE_SCHEMA_VERSION,
            computed_at,
            values: [MISSING_FEATURE; FEATURE_COUNT],
        }
    }

    /// Non-finite values are stored as the sentinel; JSON has no NaN.
    pub fn set(&mut self, feature: Feature, value: f64) {
        self.values[feature.index()] = if value.is_finite() {
            value
        } else {
            MISSING_FEATURE
        };
    }

    pub fn set_flag(&mut self, feature: Feature, flag: bool) {
        self.set(feature, if flag { 1.0 } else { 0.0 });
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    /// `None` when the feature holds the sentinel
    pub fn available(&self, feature: Feature) -> Option<f64> {
        let value = self.get(feature);
        (value != MISSING_FEATURE).then_some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.iter().map(|f| (*f, self.values[f.index()]))
    }

    pub fn keys(&self) -> Vec<&'static str> {
        Feature::ALL.iter().map(|f| f.as_str()).collect()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| **v == MISSING_FEATURE).count()
    }
}

/// Serializes the value array as an ordered `{name: value}` object.
mod feature_values {
    use super::*;

    pub fn serialize<S>(values: &[f64; FEATURE_COUNT], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for feature in Feature::ALL {
            map.serialize_entry(feature.as_str(), &values[feature.index()])?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[f64; FEATURE_COUNT], D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ValuesVisitor)
    }

    struct ValuesVisitor;

    impl<'de> Visitor<'de> for ValuesVisitor {
        type Value = [f64; FEATURE_COUNT];

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of feature names to numbers")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut values = [MISSING_FEATURE; FEATURE_COUNT];
            while let Some(key) = access.next_key::<String>()? {
                match Feature::from_name(&key) {
                    Some(feature) => values[feature.index()] = access.next_value::<f64>()?,
                    // Keys from newer schema versions
                    None => {
                        access.next_value::<IgnoredAny>()?;
                    }
                }
            }
            Ok(values)
        }
    }
}
