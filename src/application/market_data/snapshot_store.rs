use crate::domain::market::types::{
    DerivativesSnapshot, MARKET_WIDE, MacroSnapshot, NormalizedSnapshot, OrderBookSnapshot,
    SnapshotPayload, WhaleTransaction,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const ORDERBOOK_HISTORY: usize = 32;
const POLLED_HISTORY: usize = 8;
/// Whale transfers older than this are pruned regardless of the query window
const WHALE_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;
const WHALE_CAPACITY: usize = 1_000;

/// Short timestamped history of one snapshot kind, newest last.
#[derive(Debug)]
struct History<T> {
    entries: VecDeque<(i64, T)>,
    capacity: usize,
}

impl<T: Clone> History<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Latest-wins: a snapshot older than the newest one held is discarded.
    fn push(&mut self, ts: i64, value: T) -> bool {
        if let Some((last_ts, _)) = self.entries.back()
            && ts < *last_ts
        {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((ts, value));
        true
    }

    /// Most recent entry taken at or before `at`.
    fn at_or_before(&self, at: i64) -> Option<(i64, T)> {
        self.entries
            .iter()
            .rev()
            .find(|(ts, _)| *ts <= at)
            .map(|(ts, v)| (*ts, v.clone()))
    }
}

#[derive(Debug, Default)]
struct Inner {
    orderbooks: HashMap<String, History<OrderBookSnapshot>>,
    derivatives: HashMap<String, History<DerivativesSnapshot>>,
    macros: HashMap<String, History<MacroSnapshot>>,
    whales: HashMap<String, VecDeque<(i64, WhaleTransaction)>>,
    seen_whale_hashes: HashSet<String>,
}

/// Live cache of context snapshots written by connectors and read by the
/// feature extractor.
///
/// Every read returns an owned copy, so readers never hold a reference into
/// state that connectors keep mutating.
pub struct SnapshotStore {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("inner", &"<RwLock>")
            .finish()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("SnapshotStore: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores a snapshot. Returns `false` when it was superseded by a newer
    /// one already held (or is a whale transfer seen before).
    pub fn apply(&self, snapshot: NormalizedSnapshot) -> bool {
        let NormalizedSnapshot {
            symbol,
            timestamp,
            payload,
        } = snapshot;
        let mut inner = self.write();

        match payload {
            SnapshotPayload::OrderBook(book) => inner
                .orderbooks
                .entry(symbol)
                .or_insert_with(|| History::new(ORDERBOOK_HISTORY))
                .push(timestamp, book),
            SnapshotPayload::Derivatives(derivs) => inner
                .derivatives
                .entry(symbol)
                .or_insert_with(|| History::new(POLLED_HISTORY))
                .push(timestamp, derivs),
            SnapshotPayload::Macro(snapshot) => inner
                .macros
                .entry(MARKET_WIDE.to_string())
                .or_insert_with(|| History::new(POLLED_HISTORY))
                .push(timestamp, snapshot),
            SnapshotPayload::Whale(tx) => {
                if !inner.seen_whale_hashes.insert(tx.hash.clone()) {
                    return false;
                }
                let queue = inner.whales.entry(symbol).or_default();
                queue.push_back((timestamp, tx));
                let newest = queue.iter().map(|(ts, _)| *ts).max().unwrap_or(timestamp);
                let mut pruned = Vec::new();
                while let Some((ts, _)) = queue.front()
                    && (newest - ts > WHALE_RETENTION_MS || queue.len() > WHALE_CAPACITY)
                {
                    if let Some((_, old)) = queue.pop_front() {
                        pruned.push(old.hash);
                    }
                }
                for hash in pruned {
                    inner.seen_whale_hashes.remove(&hash);
                }
                true
            }
        }
    }

    /// Most recent orderbook for `symbol` taken at or before `at`.
    pub fn orderbook_at(&self, symbol: &str, at: i64) -> Option<(i64, OrderBookSnapshot)> {
        self.read().orderbooks.get(symbol)?.at_or_before(at)
    }

    /// Most recent derivatives snapshot for `symbol` taken at or before `at`.
    pub fn derivatives_at(&self, symbol: &str, at: i64) -> Option<(i64, DerivativesSnapshot)> {
        self.read().derivatives.get(symbol)?.at_or_before(at)
    }

    pub fn macro_at(&self, at: i64) -> Option<(i64, MacroSnapshot)> {
        self.read().macros.get(MARKET_WIDE)?.at_or_before(at)
    }

    /// Whale transfers for `symbol` with `from < ts <= to`.
    pub fn whales_between(&self, symbol: &str, from: i64, to: i64) -> Vec<(i64, WhaleTransaction)> {
        self.read()
            .whales
            .get(symbol)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|(ts, _)| *ts > from && *ts <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
