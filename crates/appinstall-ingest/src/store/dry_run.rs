//! Dry-run store
//!
//! Writes nothing. Each `set` decodes the payload and logs it at debug level.

use appinstall_common::types::DeviceType;
use async_trait::async_trait;
use tracing::debug;

use super::{KvStore, StoreConnector, StoreError};
use crate::codec;

/// Logs writes instead of performing them
pub struct DryRunStore {
    partition: DeviceType,
    addr: String,
}

#[async_trait]
impl KvStore for DryRunStore {
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        match codec::decode(value) {
            Ok(payload) => debug!(
                partition = %self.partition,
                addr = %self.addr,
                key = %key,
                lat = payload.lat,
                lon = payload.lon,
                apps = ?payload.apps,
                "Dry run set"
            ),
            Err(e) => debug!(partition = %self.partition, key = %key, error = %e, "Dry run set (undecodable)"),
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

#[derive(Debug, Clone, Default)]
pub struct DryRunConnector;

impl StoreConnector for DryRunConnector {
    fn connect(&self, partition: DeviceType, addr: &str) -> Box<dyn KvStore> {
        Box::new(DryRunStore {
            partition,
            addr: addr.to_string(),
        })
    }
}
