use crate::domain::market::session::SessionKey;
use crate::domain::market::types::NormalizedTick;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};

const BUCKET_MS: i64 = 60_000;

/// Running volume-weighted price moments.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VwapAccumulator {
    sum_pv: f64,
    sum_v: f64,
    sum_pv2: f64,
}

impl VwapAccumulator {
    pub fn add(&mut self, price: f64, volume: f64) {
        self.sum_pv += price * volume;
        self.sum_v += volume;
        self.sum_pv2 += price * price * volume;
    }

    fn merge(&mut self, other: &VwapAccumulator) {
        self.sum_pv += other.sum_pv;
        self.sum_v += other.sum_v;
        self.sum_pv2 += other.sum_pv2;
    }

    pub fn volume(&self) -> f64 {
        self.sum_v
    }

    pub fn vwap(&self) -> Option<f64> {
        (self.sum_v > 0.0).then(|| self.sum_pv / self.sum_v)
    }

    /// Volume-weighted standard deviation of price: sqrt(E[p²] - E[p]²).
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.vwap()?;
        let variance = (self.sum_pv2 / self.sum_v - mean * mean).max(0.0);
        Some(variance.sqrt())
    }
}

/// Point-in-time copy of a symbol's VWAP statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct VwapSnapshot {
    pub rolling_vwap: Option<f64>,
    pub rolling_std: Option<f64>,
    pub session_vwap: Option<f64>,
    pub session_high: Option<f64>,
    pub session_low: Option<f64>,
    /// Timestamp of the last trade included
    pub as_of: i64,
}

#[derive(Debug)]
struct VwapTracker {
    window_ms: i64,
    /// Per-minute accumulators, oldest first
    buckets: VecDeque<(i64, VwapAccumulator)>,
    session: Option<SessionKey>,
    session_acc: VwapAccumulator,
    session_high: Option<f64>,
    session_low: Option<f64>,
    last_ts: i64,
}

impl VwapTracker {
    fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            buckets: VecDeque::new(),
            session: None,
            session_acc: VwapAccumulator::default(),
            session_high: None,
            session_low: None,
            last_ts: i64::MIN,
        }
    }

    fn record(&mut self, ts: i64, price: f64, volume: f64) {
        self.last_ts = self.last_ts.max(ts);

        let bucket = ts.div_euclid(BUCKET_MS) * BUCKET_MS;
        match self.buckets.iter_mut().rev().find(|(start, _)| *start == bucket) {
            Some((_, acc)) => acc.add(price, volume),
            None => {
                let mut acc = VwapAccumulator::default();
                acc.add(price, volume);
                let pos = self
                    .buckets
                    .iter()
                    .position(|(start, _)| *start > bucket)
                    .unwrap_or(self.buckets.len());
                self.buckets.insert(pos, (bucket, acc));
            }
        }
        let cutoff = self.last_ts - self.window_ms;
        while let Some((start, _)) = self.buckets.front()
            && start + BUCKET_MS <= cutoff
        {
            self.buckets.pop_front();
        }

        if let Some(key) = SessionKey::from_millis(ts) {
            match self.session {
                Some(current) if current == key => {}
                // A slightly reordered trade from the previous session is not counted
                Some(_) if ts < self.last_ts => return,
                _ => {
                    self.session = Some(key);
                    self.session_acc = VwapAccumulator::default();
                    self.session_high = None;
                    self.session_low = None;
                }
            }
        }
        self.session_acc.add(price, volume);
        self.session_high = Some(self.session_high.map_or(price, |h| h.max(price)));
        self.session_low = Some(self.session_low.map_or(price, |l| l.min(price)));
    }

    fn snapshot(&self) -> VwapSnapshot {
        let mut rolling = VwapAccumulator::default();
        for (_, acc) in &self.buckets {
            rolling.merge(acc);
        }
        VwapSnapshot {
            rolling_vwap: rolling.vwap(),
            rolling_std: rolling.std_dev(),
            session_vwap: self.session_acc.vwap(),
            session_high: self.session_high,
            session_low: self.session_low,
            as_of: self.last_ts,
        }
    }
}

/// Rolling and session VWAP per symbol, fed by every validated trade.
pub struct TradeStats {
    window_ms: i64,
    trackers: HashMap<String, VwapTracker>,
}

impl TradeStats {
    pub fn new(rolling_window_minutes: u32) -> Self {
        Self {
            window_ms: i64::from(rolling_window_minutes) * 60_000,
            trackers: HashMap::new(),
        }
    }

    pub fn record(&mut self, tick: &NormalizedTick) {
        let (Some(price), Some(volume)) = (tick.price.to_f64(), tick.size.to_f64()) else {
            return;
        };
        let window_ms = self.window_ms;
        self.trackers
            .entry(tick.symbol.clone())
            .or_insert_with(|| VwapTracker::new(window_ms))
            .record(tick.timestamp, price, volume);
    }

    pub fn snapshot(&self, symbol: &str) -> Option<VwapSnapshot> {
        self.trackers.get(symbol).map(VwapTracker::snapshot)
    }
}
