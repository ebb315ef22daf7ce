//! Partition writer workers
//!
//! Each worker owns one store connection to its partition and writes items
//! with a bounded number of attempts. An item that exhausts its attempts is
//! counted as failed and the worker moves on.

use appinstall_common::types::{DeviceType, StoreItem};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::stats::PipelineStats;
use super::{RetryPolicy, SharedReceiver};
use crate::store::{KvStore, StoreError};

pub struct StoreWriter {
    partition: DeviceType,
    id: usize,
    store: Box<dyn KvStore>,
    retry: RetryPolicy,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl StoreWriter {
    pub fn new(
        partition: DeviceType,
        id: usize,
        store: Box<dyn KvStore>,
        retry: RetryPolicy,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            partition,
            id,
            store,
            retry,
            stats,
            cancel,
        }
    }

    /// Write items until the partition queue is closed and drained
    pub async fn run(mut self, items: SharedReceiver<StoreItem>) {
        debug!(
            partition = %self.partition,
            worker = self.id,
            endpoint = %self.store.endpoint(),
            "Store writer started"
        );

        while let Some(item) = items.recv().await {
            match self.write(&item).await {
                Ok(()) => self.stats.record_written(),
                Err(e) => {
                    self.stats.record_failed();
                    error!(
                        partition = %self.partition,
                        endpoint = %self.store.endpoint(),
                        key = %item.key,
                        error = %e,
                        "Giving up on item"
                    );
                },
            }
        }

        debug!(partition = %self.partition, worker = self.id, "Store writer finished");
    }

    async fn write(&mut self, item: &StoreItem) -> Result<(), StoreError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match self.store.set(&item.key, &item.value).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= max_attempts || self.cancel.is_cancelled() {
                return Err(err);
            }

            warn!(
                partition = %self.partition,
                key = %item.key,
                attempt,
                max_attempts,
                error = %err,
                "Store write failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.retry.delay) => {},
                _ = self.cancel.cancelled() => return Err(err),
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pipeline::hand_off;
    use crate::store::{MemoryConnector, MemoryStore, StoreConnector};
    use std::time::Duration;

    fn item(key: &str) -> StoreItem {
        StoreItem {
            key: key.to_string(),
            value: b"payload".to_vec(),
        }
    }

    fn writer(store: &MemoryStore, retry: RetryPolicy, stats: &Arc<PipelineStats>) -> StoreWriter {
        let conn = MemoryConnector::new(store.clone()).connect(DeviceType::Idfa, "mem:idfa");
        StoreWriter::new(
            DeviceType::Idfa,
            0,
            conn,
            retry,
            Arc::clone(stats),
            CancellationToken::new(),
        )
    }

    const FAST_RETRY: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(1),
    };

    #[tokio::test]
    async fn test_recovers_within_retry_bound() {
        let store = MemoryStore::new();
        store.fail_times(DeviceType::Idfa, 2);
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = hand_off(4);

        tx.send(item("idfa:1")).await.unwrap();
        drop(tx);
        writer(&store, FAST_RETRY, &stats).run(rx).await;

        assert_eq!(store.attempts(), 3);
        assert!(store.get("idfa:1").is_some());
        let summary = stats.snapshot(0);
        assert_eq!(summary.items_written, 1);
        assert_eq!(summary.items_failed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_item_fails_and_next_proceeds() {
        let store = MemoryStore::new();
        store.fail_times(DeviceType::Idfa, 3);
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = hand_off(4);

        tx.send(item("idfa:1")).await.unwrap();
        tx.send(item("idfa:2")).await.unwrap();
        drop(tx);
        writer(&store, FAST_RETRY, &stats).run(rx).await;

        assert_eq!(store.attempts(), 4);
        assert!(store.get("idfa:1").is_none());
        assert!(store.get("idfa:2").is_some());
        let summary = stats.snapshot(0);
        assert_eq!(summary.items_written, 1);
        assert_eq!(summary.items_failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_skips_retry_wait() {
        let store = MemoryStore::new();
        store.fail_always(DeviceType::Idfa);
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = hand_off(4);

        let slow = RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_secs(3600),
        };
        let w = writer(&store, slow, &stats);
        let cancel = w.cancel.clone();

        tx.send(item("idfa:1")).await.unwrap();
        drop(tx);
        let handle = tokio::spawn(w.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.attempts(), 1);
        assert_eq!(stats.snapshot(0).items_failed, 1);
    }
}
