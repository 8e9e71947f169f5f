//! Segment naming, discovery, crash recovery and read-back.
//!
//! A segment is named `wicks_{symbol}_{YYYYMMDD}_{seq:04}.jsonl`. While it is
//! being written it carries an extra `.active` suffix; sealing renames it.

use crate::domain::errors::StorageWriteError;
use crate::domain::storage::StorageRecord;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SEGMENT_PREFIX: &str = "wicks_";
pub const SEALED_SUFFIX: &str = ".jsonl";
pub const ACTIVE_SUFFIX: &str = ".jsonl.active";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SegmentName {
    pub symbol: String,
    pub date: NaiveDate,
    pub seq: u32,
}

impl SegmentName {
    pub fn sealed_file_name(&self) -> String {
        format!(
            "{}{}_{}_{:04}{}",
            SEGMENT_PREFIX,
            self.symbol,
            self.date.format("%Y%m%d"),
            self.seq,
            SEALED_SUFFIX
        )
    }

    pub fn active_file_name(&self) -> String {
        format!("{}.active", self.sealed_file_name())
    }

    /// Parses a sealed or active file name. Returns the name and whether it is active.
    pub fn parse(file_name: &str) -> Option<(SegmentName, bool)> {
        let rest = file_name.strip_prefix(SEGMENT_PREFIX)?;
        let (stem, active) = match rest.strip_suffix(ACTIVE_SUFFIX) {
            Some(stem) => (stem, true),
            None => (rest.strip_suffix(SEALED_SUFFIX)?, false),
        };
        let mut parts = stem.rsplitn(3, '_');
        let seq = parts.next()?.parse().ok()?;
        let date = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
        let symbol = parts.next()?.to_string();
        if symbol.is_empty() {
            return None;
        }
        Some((SegmentName { symbol, date, seq }, active))
    }
}

fn segment_entries(dir: &Path) -> Result<Vec<(SegmentName, bool, PathBuf)>, StorageWriteError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let parsed = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(SegmentName::parse);
        if let Some((name, active)) = parsed {
            entries.push((name, active, path));
        }
    }
    entries.sort();
    Ok(entries)
}

/// Sealed and active segments for `symbol`, oldest first.
pub fn list_segments(dir: &Path, symbol: &str) -> Result<Vec<PathBuf>, StorageWriteError> {
    Ok(segment_entries(dir)?
        .into_iter()
        .filter(|(name, _, _)| name.symbol == symbol)
        .map(|(_, _, path)| path)
        .collect())
}

/// Next free segment number for `symbol` on `date`.
pub fn next_segment_seq(dir: &Path, symbol: &str, date: NaiveDate) -> Result<u32, StorageWriteError> {
    Ok(segment_entries(dir)?
        .iter()
        .filter(|(name, _, _)| name.symbol == symbol && name.date == date)
        .map(|(name, _, _)| name.seq + 1)
        .max()
        .unwrap_or(1))
}

/// Every complete record of a segment, in file order.
///
/// A trailing line without its newline is an interrupted write and is
/// ignored. Unknown fields are ignored.
pub fn read_segment(path: &Path) -> Result<Vec<StorageRecord>, StorageWriteError> {
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;

    let complete = match contents.rfind('\n') {
        Some(idx) => &contents[..=idx],
        None => "",
    };
    complete
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StorageWriteError::from))
        .collect()
}

/// fsync on the directory makes a rename durable.
pub(crate) fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Seals `active` into `sealed`: fsync, rename, fsync the directory.
pub(crate) fn seal(active: &Path, sealed: &Path) -> std::io::Result<()> {
    OpenOptions::new().write(true).open(active)?.sync_all()?;
    fs::rename(active, sealed)?;
    if let Some(dir) = sealed.parent() {
        sync_dir(dir)?;
    }
    Ok(())
}

/// Truncates the partial trailing line of every leftover active segment and
/// seals it. Returns how many segments were recovered.
pub fn recover_active_segments(dir: &Path) -> Result<usize, StorageWriteError> {
    let mut recovered = 0;
    for (name, active, path) in segment_entries(dir)? {
        if !active {
            continue;
        }
        let bytes = fs::read(&path)?;
        let keep = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|idx| idx + 1)
            .unwrap_or(0);
        if keep < bytes.len() {
            warn!(
                "JsonlRecordWriter: {} has a partial trailing record ({} bytes), truncating",
                path.display(),
                bytes.len() - keep
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(keep as u64)?;
            file.sync_all()?;
        }
        let sealed = dir.join(name.sealed_file_name());
        seal(&path, &sealed)?;
        info!("JsonlRecordWriter: recovered {}", sealed.display());
        recovered += 1;
    }
    Ok(recovered)
}
