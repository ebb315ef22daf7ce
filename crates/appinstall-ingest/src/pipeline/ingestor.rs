//! File ingestor workers
//!
//! Each worker takes one file at a time, streams it through a gzip decoder on
//! the blocking thread pool, and pushes every non-blank line onto the line
//! queue. A file that fails to open or decode is abandoned without being
//! marked, so the next run picks it up again.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::discovery::InputFile;
use super::stats::{DropReason, PipelineStats};
use super::SharedReceiver;

/// File-scoped failures
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path} at line {line}: {source}")]
    FileRead {
        path: PathBuf,
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to mark {path} as completed: {source}")]
    MarkCompleted {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line queue closed while reading {0}")]
    QueueClosed(PathBuf),
}

/// How reading a file ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Every line was handed off
    Drained { lines: u64 },
    /// Cancellation stopped the read part-way
    Interrupted { lines: u64 },
}

/// One worker of the ingestor pool
pub struct FileIngestor {
    id: usize,
    lines: mpsc::Sender<String>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    mark_completed: bool,
}

impl FileIngestor {
    pub fn new(
        id: usize,
        lines: mpsc::Sender<String>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
        mark_completed: bool,
    ) -> Self {
        Self {
            id,
            lines,
            stats,
            cancel,
            mark_completed,
        }
    }

    /// Process files until the file queue is closed and drained
    pub async fn run(self, files: SharedReceiver<InputFile>) {
        debug!(worker = self.id, "File ingestor started");

        while let Some(file) = files.recv().await {
            if self.cancel.is_cancelled() {
                debug!(worker = self.id, file = %file, "Cancelled, leaving file for a later run");
                continue;
            }

            info!(worker = self.id, file = %file, "Reading file");

            let lines = self.lines.clone();
            let stats = Arc::clone(&self.stats);
            let cancel = self.cancel.clone();
            let mark_completed = self.mark_completed;
            let task_file = file.clone();

            let result = tokio::task::spawn_blocking(move || {
                ingest_file(&task_file, &lines, &stats, &cancel, mark_completed)
            })
            .await;

            match result {
                Ok(Ok(FileOutcome::Drained { lines })) => {
                    self.stats.record_file_completed();
                    info!(worker = self.id, file = %file, lines, "File drained");
                },
                Ok(Ok(FileOutcome::Interrupted { lines })) => {
                    warn!(worker = self.id, file = %file, lines, "File read interrupted by cancellation");
                },
                Ok(Err(e)) => {
                    self.stats.record_file_failed();
                    error!(worker = self.id, file = %file, error = %e, "Skipping file");
                },
                Err(e) => {
                    self.stats.record_file_failed();
                    error!(worker = self.id, file = %file, error = %e, "File reader task panicked");
                },
            }
        }

        debug!(worker = self.id, "File ingestor finished");
    }
}

/// Read one file to the end, then mark it completed.
///
/// Runs on a blocking thread: `blocking_send` parks it while the line queue
/// is full.
pub fn ingest_file(
    file: &InputFile,
    lines: &mpsc::Sender<String>,
    stats: &PipelineStats,
    cancel: &CancellationToken,
    mark_completed: bool,
) -> Result<FileOutcome, IngestError> {
    let handle = File::open(&file.path).map_err(|source| IngestError::FileOpen {
        path: file.path.clone(),
        source,
    })?;
    let mut reader = BufReader::new(MultiGzDecoder::new(handle));

    let mut buf = Vec::new();
    let mut line_no: u64 = 0;
    let mut sent: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(FileOutcome::Interrupted { lines: sent });
        }

        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| IngestError::FileRead {
                path: file.path.clone(),
                line: line_no + 1,
                source,
            })?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim_end_matches(['\r', '\n']),
            Err(_) => {
                stats.record_line_read();
                stats.record_drop(DropReason::MalformedLine);
                debug!(file = %file, line = line_no, "Dropping line with invalid UTF-8");
                continue;
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        stats.record_line_read();
        lines
            .blocking_send(line.to_string())
            .map_err(|_| IngestError::QueueClosed(file.path.clone()))?;
        sent += 1;
    }

    drop(reader);

    if mark_completed {
        file.mark_completed().map_err(|source| IngestError::MarkCompleted {
            path: file.path.clone(),
            source,
        })?;
        debug!(file = %file, completed = %file.completed_path.display(), "File marked completed");
    }

    Ok(FileOutcome::Drained { lines: sent })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write_gz(path: &std::path::Path, content: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_ingest_file_sends_lines_and_marks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tsv.gz");
        write_gz(&path, b"idfa\t1\t1\t1\t1\n\n   \ngaid\t2\t2\t2\t2\r\n");

        let file = InputFile::new(&path).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let stats = PipelineStats::new();

        let outcome = ingest_file(&file, &tx, &stats, &CancellationToken::new(), true).unwrap();

        assert_eq!(outcome, FileOutcome::Drained { lines: 2 });
        assert_eq!(rx.try_recv().unwrap(), "idfa\t1\t1\t1\t1");
        assert_eq!(rx.try_recv().unwrap(), "gaid\t2\t2\t2\t2");
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.lines_read(), 2);
        assert!(!path.exists());
        assert!(file.completed_path.exists());
    }

    #[test]
    fn test_ingest_file_without_marking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tsv.gz");
        write_gz(&path, b"idfa\t1\t1\t1\t1\n");

        let file = InputFile::new(&path).unwrap();
        let (tx, _rx) = mpsc::channel(16);

        ingest_file(&file, &tx, &PipelineStats::new(), &CancellationToken::new(), false).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = InputFile::new(dir.path().join("gone.tsv.gz")).unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let err = ingest_file(&file, &tx, &PipelineStats::new(), &CancellationToken::new(), true)
            .unwrap_err();
        assert!(matches!(err, IngestError::FileOpen { .. }));
    }

    #[test]
    fn test_corrupt_gzip_is_read_error_and_not_marked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let file = InputFile::new(&path).unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let err = ingest_file(&file, &tx, &PipelineStats::new(), &CancellationToken::new(), true)
            .unwrap_err();
        assert!(matches!(err, IngestError::FileRead { .. }));
        assert!(path.exists());
    }

    #[test]
    fn test_cancelled_read_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tsv.gz");
        write_gz(&path, b"idfa\t1\t1\t1\t1\n");

        let file = InputFile::new(&path).unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = ingest_file(&file, &tx, &PipelineStats::new(), &cancel, true).unwrap();
        assert_eq!(outcome, FileOutcome::Interrupted { lines: 0 });
        assert!(path.exists());
    }

    #[test]
    fn test_invalid_utf8_line_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tsv.gz");
        write_gz(&path, b"idfa\t\xff\t1\t1\t1\nidfa\tok\t1\t1\t1\n");

        let file = InputFile::new(&path).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let stats = PipelineStats::new();

        ingest_file(&file, &tx, &stats, &CancellationToken::new(), false).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "idfa\tok\t1\t1\t1");
        assert_eq!(stats.snapshot(1).dropped.malformed_line, 1);
        assert_eq!(stats.lines_read(), 2);
    }
}
