//! Run counters and the final summary

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::CodecError;

/// Why a line was dropped before reaching the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MalformedLine,
    MissingIdentity,
    InvalidCoordinate,
    InvalidAppId,
    Unencodable,
    UnroutableRecord,
}

impl From<&CodecError> for DropReason {
    fn from(err: &CodecError) -> Self {
        match err {
            CodecError::MalformedLine { .. } => DropReason::MalformedLine,
            CodecError::MissingIdentity => DropReason::MissingIdentity,
            CodecError::InvalidCoordinate { .. } => DropReason::InvalidCoordinate,
            CodecError::InvalidAppId { .. } => DropReason::InvalidAppId,
            CodecError::Encode(_) | CodecError::Decode(_) => DropReason::Unencodable,
        }
    }
}

/// Lock-free counters updated by every worker
#[derive(Debug, Default)]
pub struct PipelineStats {
    lines_read: AtomicU64,
    items_routed: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_missing_identity: AtomicU64,
    dropped_invalid_coordinate: AtomicU64,
    dropped_invalid_app_id: AtomicU64,
    dropped_unencodable: AtomicU64,
    dropped_unroutable: AtomicU64,
    items_written: AtomicU64,
    items_failed: AtomicU64,
    files_completed: AtomicU64,
    files_failed: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routed(&self) {
        self.items_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::MalformedLine => &self.dropped_malformed,
            DropReason::MissingIdentity => &self.dropped_missing_identity,
            DropReason::InvalidCoordinate => &self.dropped_invalid_coordinate,
            DropReason::InvalidAppId => &self.dropped_invalid_app_id,
            DropReason::Unencodable => &self.dropped_unencodable,
            DropReason::UnroutableRecord => &self.dropped_unroutable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.items_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Lines handed to the processors so far
    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    /// Items handed to partition writers so far
    pub fn items_routed(&self) -> u64 {
        self.items_routed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self, files_discovered: u64) -> RunSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        let dropped = DroppedLines {
            malformed_line: load(&self.dropped_malformed),
            missing_identity: load(&self.dropped_missing_identity),
            invalid_coordinate: load(&self.dropped_invalid_coordinate),
            invalid_app_id: load(&self.dropped_invalid_app_id),
            unencodable: load(&self.dropped_unencodable),
            unroutable_record: load(&self.dropped_unroutable),
        };
        let files_completed = load(&self.files_completed);
        let files_failed = load(&self.files_failed);

        RunSummary {
            files_discovered,
            files_completed,
            files_failed,
            files_unfinished: files_discovered.saturating_sub(files_completed + files_failed),
            lines_read: load(&self.lines_read),
            dropped,
            items_written: load(&self.items_written),
            items_failed: load(&self.items_failed),
            cancelled: false,
        }
    }
}

/// Lines dropped, by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedLines {
    pub malformed_line: u64,
    pub missing_identity: u64,
    pub invalid_coordinate: u64,
    pub invalid_app_id: u64,
    pub unencodable: u64,
    pub unroutable_record: u64,
}

impl DroppedLines {
    pub fn total(&self) -> u64 {
        self.malformed_line
            + self.missing_identity
            + self.invalid_coordinate
            + self.invalid_app_id
            + self.unencodable
            + self.unroutable_record
    }
}

/// Final report of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub files_discovered: u64,
    pub files_completed: u64,
    pub files_failed: u64,
    /// Never dispatched or interrupted by cancellation
    pub files_unfinished: u64,
    pub lines_read: u64,
    pub dropped: DroppedLines,
    pub items_written: u64,
    pub items_failed: u64,
    pub cancelled: bool,
}

impl RunSummary {
    /// Dropped lines plus permanently failed items
    pub fn errors(&self) -> u64 {
        self.dropped.total() + self.items_failed
    }

    /// Errors per line read; `None` when nothing was read
    pub fn error_rate(&self) -> Option<f64> {
        if self.lines_read == 0 {
            return None;
        }
        Some(self.errors() as f64 / self.lines_read as f64)
    }

    /// Whether the run stayed below `max_error_rate`
    pub fn is_acceptable(&self, max_error_rate: f64) -> bool {
        self.error_rate().map_or(true, |rate| rate < max_error_rate)
    }
}
