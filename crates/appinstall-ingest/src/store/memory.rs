//! In-process store for tests
//!
//! [`MemoryStore`] keeps every write in a map and can be told to fail or stall
//! per partition, which is how the pipeline tests exercise retries and
//! backpressure. Built for unit tests and behind the `test-util` feature.

use appinstall_common::types::DeviceType;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::{KvStore, StoreConnector, StoreError};

#[derive(Debug, Clone, Copy)]
enum Failure {
    Always,
    Times(u32),
}

struct Inner {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<DeviceType, Failure>>,
    attempts: AtomicU64,
    paused: watch::Sender<bool>,
}

/// Shared in-memory key-value map
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                attempts: AtomicU64::new(0),
                paused: watch::channel(false).0,
            }),
        }
    }

    /// Value stored under `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.inner.entries).get(key).cloned()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total `set` calls seen, failed ones included
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Make every write to `partition` fail
    pub fn fail_always(&self, partition: DeviceType) {
        lock(&self.inner.failures).insert(partition, Failure::Always);
    }

    /// Make the next `times` writes to `partition` fail
    pub fn fail_times(&self, partition: DeviceType, times: u32) {
        lock(&self.inner.failures).insert(partition, Failure::Times(times));
    }

    /// Block all writes until [`MemoryStore::resume`]
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    fn take_failure(&self, partition: DeviceType) -> bool {
        let mut failures = lock(&self.inner.failures);
        match failures.get_mut(&partition) {
            Some(Failure::Always) => true,
            Some(Failure::Times(0)) | None => false,
            Some(Failure::Times(remaining)) => {
                *remaining -= 1;
                true
            },
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One writer's view of a [`MemoryStore`]
pub struct MemoryHandle {
    store: MemoryStore,
    partition: DeviceType,
    addr: String,
}

#[async_trait]
impl KvStore for MemoryHandle {
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut paused = self.store.inner.paused.subscribe();
        // Sender lives in `store`, so this only returns once resumed.
        let _ = paused.wait_for(|paused| !*paused).await;

        self.store.inner.attempts.fetch_add(1, Ordering::Relaxed);

        if self.store.take_failure(self.partition) {
            return Err(StoreError::Io {
                addr: self.addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "injected failure"),
            });
        }

        lock(&self.store.inner.entries).insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

/// Hands out [`MemoryHandle`]s over one shared [`MemoryStore`]
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, partition: DeviceType, addr: &str) -> Box<dyn KvStore> {
        Box::new(MemoryHandle {
            store: self.store.clone(),
            partition,
            addr: addr.to_string(),
        })
    }
}
