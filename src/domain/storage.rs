use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::features::{Feature, FeatureVector};
use crate::domain::wick::{WickDirection, WickEvent};

pub const RECORD_TYPE: &str = "wick_record";
pub const RECORD_SCHEMA_VERSION: u16 = 1;

/// A finished event/feature pair waiting for a sequence id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub event: WickEvent,
    pub features: FeatureVector,
}

/// One line of an output segment. Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub record_type: String,
    pub schema_version: u16,
    pub run_id: Uuid,
    /// Gap-free and strictly increasing within a run, starting at 1
    pub sequence_id: u64,
    pub written_at: i64,
    pub event: WickEvent,
    pub features: FeatureVector,
}

impl StorageRecord {
    pub fn new(pending: PendingRecord, run_id: Uuid, sequence_id: u64, written_at: i64) -> Self {
        Self {
            record_type: RECORD_TYPE.to_string(),
            schema_version: RECORD_SCHEMA_VERSION,
            run_id,
            sequence_id,
            written_at,
            event: pending.event,
            features: pending.features,
        }
    }
}

/// Compact notification pushed to the alert sink after a record is durable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub symbol: String,
    pub timeframe: String,
    pub direction: WickDirection,
    pub wick_ratio: f64,
    pub high: f64,
    pub low: f64,
    pub timestamp: i64,
    pub sequence_id: u64,
    pub top_features: Vec<(String, f64)>,
}

/// Features surfaced in alerts, most informative first.
const ALERT_FEATURE_PRIORITY: &[Feature] = &[
    Feature::WickRatio,
    Feature::DeltaAtWick,
    Feature::DepthImbalance,
    Feature::FundingRateNow,
    Feature::OiChangePct,
    Feature::VwapZscore,
    Feature::WhaleTxCount,
    Feature::LiquidationDensity,
    Feature::TradeFrequencySpike,
];

impl AlertSummary {
    /// Builds the summary with up to `top_n` available features.
    pub fn from_record(record: &StorageRecord, top_n: usize) -> Self {
        use rust_decimal::prelude::ToPrimitive;

        let candle = &record.event.candle;
        let top_features = ALERT_FEATURE_PRIORITY
            .iter()
            .filter_map(|f| {
                record
                    .features
                    .available(*f)
                    .map(|v| (f.as_str().to_string(), v))
            })
            .take(top_n)
            .collect();

        Self {
            symbol: record.event.symbol.clone(),
            timeframe: candle.timeframe.label().to_string(),
            direction: record.event.direction,
            wick_ratio: record.event.wick_ratio,
            high: candle.high.to_f64().unwrap_or_default(),
            low: candle.low.to_f64().unwrap_or_default(),
            timestamp: record.event.event_time(),
            sequence_id: record.sequence_id,
            top_features,
        }
    }
}
