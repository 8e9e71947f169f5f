use super::{derivatives, geometry, liquidity, orderflow, session, to_f64, vwap, whale};
use crate::application::market_data::trade_stats::VwapSnapshot;
use crate::domain::errors::StaleDataError;
use crate::domain::features::FeatureVector;
use crate::domain::market::types::{
    Candle, DerivativesSnapshot, MacroSnapshot, OrderBookSnapshot, WhaleTransaction,
};
use crate::domain::wick::WickEvent;
use rust_decimal::Decimal;

/// Staleness bounds for context inputs, relative to the event time.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextLimits {
    pub orderbook_max_age_ms: i64,
    pub derivatives_max_age_ms: i64,
    pub macro_max_age_ms: i64,
    /// Trailing window for whale transfer counts
    pub whale_window_ms: i64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            orderbook_max_age_ms: 30_000,
            derivatives_max_age_ms: 300_000,
            macro_max_age_ms: 600_000,
            whale_window_ms: 15 * 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub limits: ContextLimits,
    pub doji_body_fraction: Decimal,
    pub ratio_threshold: f64,
}

/// Everything extraction may look at, captured as owned copies before the call.
///
/// Snapshot entries carry the timestamp they were taken at.
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext<'a> {
    pub event: &'a WickEvent,
    /// Closed candles preceding the event candle, oldest first
    pub history: &'a [Candle],
    pub orderbook: Option<(i64, &'a OrderBookSnapshot)>,
    pub derivatives: Option<(i64, &'a DerivativesSnapshot)>,
    pub macro_snapshot: Option<(i64, &'a MacroSnapshot)>,
    /// `None` when no whale source is configured
    pub whales: Option<&'a [(i64, WhaleTransaction)]>,
    pub vwap: Option<&'a VwapSnapshot>,
}

/// A feature vector plus the inputs that had to fall back to the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub features: FeatureVector,
    pub stale: Vec<StaleDataError>,
}

/// Computes the feature vector of a wick event.
///
/// Implementations must be pure: the result depends only on the context,
/// never on the wall clock at call time.
pub trait FeatureExtractor: Send {
    fn extract(&self, ctx: &FeatureContext<'_>) -> Extraction;
}

/// Returns the input when its age at `event_time` is within `max_age_ms`.
fn fresh<'a, T>(
    input: &'static str,
    entry: Option<(i64, &'a T)>,
    event_time: i64,
    max_age_ms: i64,
) -> Result<(i64, &'a T), StaleDataError> {
    let (ts, value) = entry.ok_or(StaleDataError::Missing { input })?;
    let age_ms = (event_time - ts).max(0);
    if age_ms > max_age_ms {
        return Err(StaleDataError::Stale {
            input,
            age_ms,
            limit_ms: max_age_ms,
        });
    }
    Ok((age_ms, value))
}

pub struct StandardFeatureExtractor {
    config: ExtractorConfig,
}

impl StandardFeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }
}

impl FeatureExtractor for StandardFeatureExtractor {
    fn extract(&self, ctx: &FeatureContext<'_>) -> Extraction {
        let event = ctx.event;
        let event_time = event.event_time();
        let limits = &self.config.limits;
        let mut features = FeatureVector::new(event.id.clone(), event.detected_at);
        let mut stale = Vec::new();

        geometry::apply(
            event,
            ctx.history,
            self.config.doji_body_fraction,
            self.config.ratio_threshold,
            &mut features,
        );
        orderflow::apply(&event.candle, ctx.history, &mut features);
        session::apply(event_time, &mut features);

        match fresh("orderbook", ctx.orderbook, event_time, limits.orderbook_max_age_ms) {
            Ok((age, book)) => liquidity::apply(book, age, &mut features),
            Err(e) => stale.push(e),
        }

        match fresh(
            "derivatives",
            ctx.derivatives,
            event_time,
            limits.derivatives_max_age_ms,
        ) {
            Ok((age, snapshot)) => derivatives::apply(snapshot, age, event_time, &mut features),
            Err(e) => stale.push(e),
        }

        match fresh("macro", ctx.macro_snapshot, event_time, limits.macro_max_age_ms) {
            Ok((_, snapshot)) => whale::apply_macro(snapshot, &mut features),
            Err(e) => stale.push(e),
        }

        match ctx.whales {
            Some(transfers) => whale::apply_whales(transfers, &mut features),
            None => stale.push(StaleDataError::Missing { input: "whale" }),
        }

        match ctx.vwap {
            Some(stats) => vwap::apply(stats, to_f64(event.candle.close), &mut features),
            None => stale.push(StaleDataError::Missing { input: "vwap" }),
        }

        Extraction { features, stale }
    }
}
