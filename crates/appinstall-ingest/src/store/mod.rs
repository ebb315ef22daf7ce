//! Key-value store clients
//!
//! Writers talk to their partition through the [`KvStore`] trait. Each writer
//! worker gets its own store instance from a [`StoreConnector`], so no
//! connection is ever shared between workers or partitions.
//!
//! - **memcache**: memcached text protocol over tokio TCP
//! - **dry_run**: accepts every write and only logs it
//! - **memory**: in-process map with failure injection (`test-util` feature)

use appinstall_common::types::DeviceType;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod dry_run;
pub mod memcache;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use dry_run::{DryRunConnector, DryRunStore};
pub use memcache::{MemcacheClient, MemcacheConnector};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryConnector, MemoryStore};

/// Errors from a single store operation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation on {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("{addr} rejected set: {reply}")]
    Rejected { addr: String, reply: String },

    #[error("invalid key '{0}'")]
    InvalidKey(String),
}

impl StoreError {
    /// Whether repeating the same write can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::InvalidKey(_))
    }
}

/// A single connection to one partition endpoint
#[async_trait]
pub trait KvStore: Send {
    /// Store `value` under `key`, overwriting any previous value
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Address this store writes to, for diagnostics
    fn endpoint(&self) -> &str;
}

/// Builds one store per writer worker
pub trait StoreConnector: Send + Sync {
    fn connect(&self, partition: DeviceType, addr: &str) -> Box<dyn KvStore>;
}
