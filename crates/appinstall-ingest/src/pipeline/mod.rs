//! Three-stage load pipeline
//!
//! ```text
//! file paths ──► FileIngestor ×N ──► raw lines ──► LineProcessor ×M ──► StoreWriter ×K per partition
//! ```
//!
//! Every stage is a pool of tokio tasks reading from one bounded queue, so a
//! slow store stalls the processors feeding it, which in turn stalls the
//! ingestors. The [`Pipeline`] owns the shutdown order: a queue is closed only
//! after every producer for it has finished.

use appinstall_common::types::DeviceType;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub mod discovery;
pub mod ingestor;
pub mod orchestrator;
pub mod processor;
pub mod stats;
pub mod writer;

pub use discovery::{discover, InputFile};
pub use ingestor::{FileIngestor, IngestError};
pub use orchestrator::Pipeline;
pub use processor::{LineProcessor, RoutingTable};
pub use stats::{DropReason, PipelineStats, RunSummary};
pub use writer::StoreWriter;

/// Resolved settings the pipeline runs with
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Partition endpoints; device types missing here are unroutable
    pub partitions: BTreeMap<DeviceType, String>,
    /// Concurrently open input files
    pub file_workers: usize,
    /// Line processor tasks
    pub line_workers: usize,
    /// Writer tasks (and connections) per partition
    pub connections_per_partition: usize,
    pub queues: QueueCapacities,
    pub retry: RetryPolicy,
    /// Rename drained files to their completed marker
    pub mark_completed: bool,
    /// Cancel the run once this much time has passed
    pub run_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapacities {
    pub files: usize,
    pub lines: usize,
    pub items: usize,
}

/// Bounded retry for store writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per item, first one included
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

/// Receiving end of a hand-off queue shared by every worker of a pool
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> SharedReceiver<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Next item, or `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Bounded hand-off queue whose receiver can be cloned across a worker pool
pub fn hand_off<T>(capacity: usize) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, SharedReceiver::new(rx))
}
