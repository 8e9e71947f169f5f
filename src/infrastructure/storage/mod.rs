//! Append-only JSONL storage of wick records.

pub mod jsonl_writer;
pub mod segment;

pub use jsonl_writer::{JsonlRecordWriter, StorageSettings};
pub use segment::{SegmentName, list_segments, read_segment, recover_active_segments};
