//! Durable JSONL writer: one record per line, fsynced before it is acknowledged.

use super::segment::{self, SegmentName, next_segment_seq, recover_active_segments};
use crate::domain::errors::StorageWriteError;
use crate::domain::ports::RecordWriter;
use crate::domain::storage::{PendingRecord, StorageRecord};
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub output_dir: PathBuf,
    /// Seal the active segment once it reaches this many bytes
    pub rotation_bytes: u64,
    /// Retries after a failed write, each preceded by truncation to the last good offset
    pub max_retries: u32,
}

struct ActiveSegment {
    name: SegmentName,
    path: PathBuf,
    file: File,
    bytes: u64,
}

impl ActiveSegment {
    fn open(dir: &Path, name: SegmentName) -> Result<Self, StorageWriteError> {
        let path = dir.join(name.active_file_name());
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes = file.metadata()?.len();
        segment::sync_dir(dir)?;
        info!("JsonlRecordWriter: opened segment {}", path.display());
        Ok(Self {
            name,
            path,
            file,
            bytes,
        })
    }

    /// write + fsync. A failed attempt is rolled back to `offset` so a retry
    /// never leaves a torn line behind.
    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        let offset = self.bytes;
        let result = self
            .file
            .write_all(line)
            .and_then(|_| self.file.sync_data());
        match result {
            Ok(()) => {
                self.bytes += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(truncate_err) = self.file.set_len(offset) {
                    warn!(
                        "JsonlRecordWriter: rollback of {} failed: {}",
                        self.path.display(),
                        truncate_err
                    );
                }
                Err(e)
            }
        }
    }

    /// fsync, rename to the sealed name, fsync the directory. Safe to repeat
    /// after a failure: the active file stays in place until the rename lands.
    fn seal(&self, dir: &Path) -> Result<PathBuf, StorageWriteError> {
        let sealed = dir.join(self.name.sealed_file_name());
        self.file.sync_all()?;
        segment::seal(&self.path, &sealed)?;
        info!(
            "JsonlRecordWriter: sealed {} ({} bytes)",
            sealed.display(),
            self.bytes
        );
        Ok(sealed)
    }
}

/// Single-writer record log with one active segment per symbol.
///
/// Sequence ids are run-wide, start at 1 and are gap-free: an id is only
/// consumed by a record that reached disk. A segment that could not be sealed
/// is kept aside and retried before the next write and on close.
pub struct JsonlRecordWriter {
    settings: StorageSettings,
    run_id: Uuid,
    next_sequence: u64,
    active: HashMap<String, ActiveSegment>,
    unsealed: Vec<ActiveSegment>,
    clock: Box<dyn Fn() -> DateTime<Utc> + Send>,
    metrics: Option<Metrics>,
    #[cfg(test)]
    fail_writes: u32,
    #[cfg(test)]
    fail_seals: u32,
}

impl JsonlRecordWriter {
    /// Creates the output directory, recovers leftover active segments and
    /// starts a new run.
    pub fn open(settings: StorageSettings) -> Result<Self, StorageWriteError> {
        fs::create_dir_all(&settings.output_dir)?;
        let recovered = recover_active_segments(&settings.output_dir)?;
        if recovered > 0 {
            warn!(
                "JsonlRecordWriter: recovered {} segment(s) left active by a previous run",
                recovered
            );
        }
        let run_id = Uuid::new_v4();
        info!(
            "JsonlRecordWriter: run {} writing to {}",
            run_id,
            settings.output_dir.display()
        );
        Ok(Self {
            settings,
            run_id,
            next_sequence: 1,
            active: HashMap::new(),
            unsealed: Vec::new(),
            clock: Box::new(Utc::now),
            metrics: None,
            #[cfg(test)]
            fail_writes: 0,
            #[cfg(test)]
            fail_seals: 0,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Active segment for `symbol` on `date`, sealing the previous day's first.
    fn segment_for(&mut self, symbol: &str, date: NaiveDate) -> Result<&mut ActiveSegment, StorageWriteError> {
        let dir = self.settings.output_dir.clone();
        let date_changed = self
            .active
            .get(symbol)
            .is_some_and(|current| current.name.date != date);
        if date_changed && let Some(stale) = self.active.remove(symbol) {
            self.seal_with_retries(stale)?;
        }

        if !self.active.contains_key(symbol) {
            let seq = next_segment_seq(&dir, symbol, date)?;
            let name = SegmentName {
                symbol: symbol.to_string(),
                date,
                seq,
            };
            let segment = ActiveSegment::open(&dir, name)?;
            self.active.insert(symbol.to_string(), segment);
        }

        self.active
            .get_mut(symbol)
            .ok_or_else(|| StorageWriteError::Io(std::io::Error::other("active segment vanished")))
    }

    /// Seals `segment`, retrying like a write. On exhaustion the segment is
    /// parked in `unsealed` so a later call can finish the job.
    fn seal_with_retries(&mut self, segment: ActiveSegment) -> Result<(), StorageWriteError> {
        let attempts = self.settings.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            #[cfg(test)]
            let result = if self.fail_seals > 0 {
                self.fail_seals -= 1;
                Err(StorageWriteError::Io(std::io::Error::other("injected seal failure")))
            } else {
                segment.seal(&self.settings.output_dir)
            };
            #[cfg(not(test))]
            let result = segment.seal(&self.settings.output_dir);

            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        "JsonlRecordWriter: seal attempt {}/{} of {} failed: {}",
                        attempt,
                        attempts,
                        segment.path.display(),
                        e
                    );
                    if let Some(m) = &self.metrics
                        && attempt < attempts
                    {
                        m.storage_retries_total.inc();
                    }
                    last_error = e.to_string();
                }
            }
        }

        let path = segment.path.clone();
        self.unsealed.push(segment);
        Err(StorageWriteError::Exhausted {
            path,
            attempts,
            last_error,
        })
    }

    /// Retries every parked segment. Returns the first failure.
    fn seal_leftovers(&mut self) -> Result<(), StorageWriteError> {
        let mut first_error = None;
        for segment in std::mem::take(&mut self.unsealed) {
            if let Err(e) = self.seal_with_retries(segment) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn write_with_retries(&mut self, symbol: &str, date: NaiveDate, line: &[u8]) -> Result<(), StorageWriteError> {
        let attempts = self.settings.max_retries + 1;
        let metrics = self.metrics.clone();
        #[cfg(test)]
        let mut injected = std::mem::take(&mut self.fail_writes);

        let segment = self.segment_for(symbol, date)?;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            #[cfg(test)]
            let result = if injected > 0 {
                injected -= 1;
                // Leave a torn line behind, as a real short write would
                let _ = segment.file.write_all(&line[..line.len() / 2]);
                let _ = segment.file.set_len(segment.bytes);
                Err(std::io::Error::other("injected write failure"))
            } else {
                segment.write_line(line)
            };
            #[cfg(not(test))]
            let result = segment.write_line(line);

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "JsonlRecordWriter: write attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        segment.path.display(),
                        e
                    );
                    if let Some(m) = &metrics
                        && attempt < attempts
                    {
                        m.storage_retries_total.inc();
                    }
                    last_error = e.to_string();
                }
            }
        }

        Err(StorageWriteError::Exhausted {
            path: segment.path.clone(),
            attempts,
            last_error,
        })
    }
}

impl RecordWriter for JsonlRecordWriter {
    fn append(&mut self, pending: PendingRecord) -> Result<StorageRecord, StorageWriteError> {
        // A segment left unsealed earlier must not be left behind silently
        if !self.unsealed.is_empty() {
            self.seal_leftovers()?;
        }

        let written_at = (self.clock)();
        let symbol = pending.event.symbol.clone();
        let record = StorageRecord::new(
            pending,
            self.run_id,
            self.next_sequence,
            written_at.timestamp_millis(),
        );
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        self.write_with_retries(&symbol, segment_date(written_at), &line)?;
        self.next_sequence += 1;
        debug!(
            "JsonlRecordWriter: #{} {} stored",
            record.sequence_id, record.event.id
        );

        // The record is durable from here on; a failed seal is reported later
        let rotate = self
            .active
            .get(&symbol)
            .is_some_and(|s| s.bytes >= self.settings.rotation_bytes);
        if rotate
            && let Some(full) = self.active.remove(&symbol)
            && let Err(e) = self.seal_with_retries(full)
        {
            error!("JsonlRecordWriter: rotation deferred: {}", e);
        }
        Ok(record)
    }

    fn close(&mut self) -> Result<(), StorageWriteError> {
        let open: Vec<ActiveSegment> = self.active.drain().map(|(_, segment)| segment).collect();
        self.unsealed.extend(open);
        self.seal_leftovers()?;
        info!(
            "JsonlRecordWriter: run {} closed after {} record(s)",
            self.run_id,
            self.next_sequence - 1
        );
        Ok(())
    }
}

fn segment_date(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::{Feature, FeatureVector};
    use crate::domain::market::timeframe::Timeframe;
    use crate::domain::market::types::Candle;
    use crate::domain::wick::{WickDirection, WickEvent};
    use crate::infrastructure::storage::segment::{list_segments, read_segment};
    use rust_decimal_macros::dec;

    fn pending(symbol: &str, minute: i64) -> PendingRecord {
        let open_time = 1_704_067_200_000 + minute * 60_000;
        let candle = Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::OneMin,
            open: dec!(100),
            high: dec!(110),
            low: dec!(99),
            close: dec!(101),
            volume: dec!(3),
            buy_volume: dec!(2),
            sell_volume: dec!(1),
            trade_count: 3,
            open_time,
            close_time: open_time + 60_000,
        };
        let event = WickEvent::new(candle, WickDirection::Upper, 9.0, open_time + 60_100);
        let mut features = FeatureVector::new(event.id.clone(), event.detected_at);
        features.set(Feature::WickRatio, 9.0);
        PendingRecord { event, features }
    }

    fn writer(dir: &Path, rotation_bytes: u64) -> JsonlRecordWriter {
        JsonlRecordWriter::open(StorageSettings {
            output_dir: dir.to_path_buf(),
            rotation_bytes,
            max_retries: 3,
        })
        .unwrap()
    }

    #[test]
    fn test_records_read_back_identically() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1 << 20);
        let written: Vec<StorageRecord> = (0..5)
            .map(|i| w.append(pending("BTC-USDT", i)).unwrap())
            .collect();
        w.close().unwrap();

        let segments = list_segments(dir.path(), "BTC-USDT").unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].to_string_lossy().ends_with("_0001.jsonl"));
        let read = read_segment(&segments[0]).unwrap();
        assert_eq!(read, written);
        let ids: Vec<u64> = read.iter().map(|r| r.sequence_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rotation_neither_drops_nor_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        // Small threshold: every record seals its segment
        let mut w = writer(dir.path(), 1);
        for i in 0..4 {
            w.append(pending("ETH-USDT", i)).unwrap();
        }
        w.close().unwrap();

        let segments = list_segments(dir.path(), "ETH-USDT").unwrap();
        assert_eq!(segments.len(), 4);
        let ids: Vec<u64> = segments
            .iter()
            .flat_map(|p| read_segment(p).unwrap())
            .map(|r| r.sequence_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(
            fs::read_dir(dir.path())
                .unwrap()
                .all(|e| !e.unwrap().path().to_string_lossy().ends_with(".active"))
        );
    }

    #[test]
    fn test_sequence_is_run_wide_across_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1 << 20);
        assert_eq!(w.append(pending("BTC-USDT", 0)).unwrap().sequence_id, 1);
        assert_eq!(w.append(pending("SOL-USDT", 0)).unwrap().sequence_id, 2);
        assert_eq!(w.append(pending("BTC-USDT", 1)).unwrap().sequence_id, 3);
    }

    #[test]
    fn test_failed_attempts_are_rolled_back_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Metrics::new().unwrap();
        let mut w = writer(dir.path(), 1 << 20).with_metrics(metrics.clone());
        w.append(pending("BTC-USDT", 0)).unwrap();
        w.fail_writes = 2;
        let record = w.append(pending("BTC-USDT", 1)).unwrap();
        assert_eq!(record.sequence_id, 2);
        assert_eq!(metrics.storage_retries_total.get(), 2.0);
        w.close().unwrap();

        let path = &list_segments(dir.path(), "BTC-USDT").unwrap()[0];
        let ids: Vec<u64> = read_segment(path).unwrap().iter().map(|r| r.sequence_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_exhaustion_does_not_consume_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1 << 20);
        w.fail_writes = 4;
        match w.append(pending("BTC-USDT", 0)) {
            Err(StorageWriteError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {:?}", other.map(|r| r.sequence_id)),
        }
        assert_eq!(w.append(pending("BTC-USDT", 1)).unwrap().sequence_id, 1);
    }

    #[test]
    fn test_failed_rotation_keeps_the_durable_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1);
        w.fail_seals = 4;
        let first = w.append(pending("BTC-USDT", 0)).unwrap();
        assert_eq!(first.sequence_id, 1);
        assert!(list_segments(dir.path(), "BTC-USDT").unwrap()[0]
            .to_string_lossy()
            .ends_with(".active"));

        // The parked segment is sealed before the next write
        assert_eq!(w.append(pending("BTC-USDT", 1)).unwrap().sequence_id, 2);
        w.close().unwrap();

        let segments = list_segments(dir.path(), "BTC-USDT").unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|p| p.to_string_lossy().ends_with(".jsonl")));
        let ids: Vec<u64> = segments
            .iter()
            .flat_map(|p| read_segment(p).unwrap())
            .map(|r| r.sequence_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_unsealable_segment_fails_the_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1);
        w.fail_seals = 8;
        w.append(pending("BTC-USDT", 0)).unwrap();

        assert!(matches!(
            w.append(pending("BTC-USDT", 1)),
            Err(StorageWriteError::Exhausted { attempts: 4, .. })
        ));
        // Nothing was written for the refused record
        let segments = list_segments(dir.path(), "BTC-USDT").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(read_segment(&segments[0]).unwrap().len(), 1);

        // Once the disk recovers the sequence continues without a gap
        assert_eq!(w.append(pending("BTC-USDT", 2)).unwrap().sequence_id, 2);
    }

    #[test]
    fn test_utc_date_rollover_seals_and_continues() {
        use chrono::TimeZone;
        use std::sync::{Arc, Mutex};

        let dir = tempfile::tempdir().unwrap();
        let now = Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 1, 5, 23, 59, 58).unwrap()));
        let clock = now.clone();
        let mut w = writer(dir.path(), 1 << 20).with_clock(move || *clock.lock().unwrap());

        w.append(pending("BTC-USDT", 0)).unwrap();
        w.append(pending("BTC-USDT", 1)).unwrap();
        *now.lock().unwrap() = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 1).unwrap();
        w.append(pending("BTC-USDT", 2)).unwrap();

        // The first day's segment is sealed as soon as the date moves on
        let segments = list_segments(dir.path(), "BTC-USDT").unwrap();
        assert_eq!(segments.len(), 2);
        let first_day = segments
            .iter()
            .find(|p| p.to_string_lossy().contains("_20240105_"))
            .unwrap();
        assert!(first_day.to_string_lossy().ends_with("_0001.jsonl"));

        w.append(pending("BTC-USDT", 3)).unwrap();
        w.close().unwrap();

        let per_day: Vec<Vec<u64>> = list_segments(dir.path(), "BTC-USDT")
            .unwrap()
            .iter()
            .map(|p| read_segment(p).unwrap().iter().map(|r| r.sequence_id).collect())
            .collect();
        assert_eq!(per_day, vec![vec![1, 2], vec![3, 4]]);
    }
}
