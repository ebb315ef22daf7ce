//! Line processor workers
//!
//! Parse and encode each raw line, then route the item to the writer pool of
//! its device type. Rejected lines are counted and logged, never fatal.

use appinstall_common::types::{DeviceType, StoreItem};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::stats::{DropReason, PipelineStats};
use super::SharedReceiver;
use crate::codec;

/// Device type to partition queue.
///
/// Holds the only long-lived clones of the partition senders, so dropping
/// the last `Arc<RoutingTable>` closes every partition queue.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<DeviceType, mpsc::Sender<StoreItem>>,
}

impl RoutingTable {
    pub fn new(routes: HashMap<DeviceType, mpsc::Sender<StoreItem>>) -> Self {
        Self { routes }
    }

    /// Queue for a raw device type token, if that partition is configured
    pub fn route(&self, device_type: &str) -> Option<&mpsc::Sender<StoreItem>> {
        let device_type: DeviceType = device_type.parse().ok()?;
        self.routes.get(&device_type)
    }
}

/// One worker of the line processor pool
pub struct LineProcessor {
    id: usize,
    routes: Arc<RoutingTable>,
    stats: Arc<PipelineStats>,
}

impl LineProcessor {
    pub fn new(id: usize, routes: Arc<RoutingTable>, stats: Arc<PipelineStats>) -> Self {
        Self { id, routes, stats }
    }

    /// Drain the line queue. The routing table is released on return.
    pub async fn run(self, lines: SharedReceiver<String>) {
        debug!(worker = self.id, "Line processor started");

        while let Some(line) = lines.recv().await {
            self.process(&line).await;
        }

        debug!(worker = self.id, "Line processor finished");
    }

    async fn process(&self, line: &str) {
        let record = match codec::parse(line) {
            Ok(record) => record,
            Err(e) => {
                self.stats.record_drop(DropReason::from(&e));
                debug!(worker = self.id, error = %e, "Dropping line");
                return;
            },
        };

        let Some(queue) = self.routes.route(&record.device_type) else {
            self.stats.record_drop(DropReason::UnroutableRecord);
            debug!(
                worker = self.id,
                device_type = %record.device_type,
                "Dropping line for unknown partition"
            );
            return;
        };

        let item = match codec::encode_record(&record) {
            Ok(item) => item,
            Err(e) => {
                self.stats.record_drop(DropReason::from(&e));
                warn!(worker = self.id, key = %record.key(), error = %e, "Failed to encode record");
                return;
            },
        };

        if queue.send(item).await.is_err() {
            // Only reachable if every writer of the partition panicked.
            warn!(worker = self.id, device_type = %record.device_type, "Partition queue closed");
            self.stats.record_failed();
            return;
        }

        self.stats.record_routed();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pipeline::hand_off;

    fn table(types: &[DeviceType]) -> (Arc<RoutingTable>, HashMap<DeviceType, mpsc::Receiver<StoreItem>>) {
        let mut routes = HashMap::new();
        let mut receivers = HashMap::new();
        for &device_type in types {
            let (tx, rx) = mpsc::channel(8);
            routes.insert(device_type, tx);
            receivers.insert(device_type, rx);
        }
        (Arc::new(RoutingTable::new(routes)), receivers)
    }

    #[test]
    fn test_route_lookup() {
        let (routes, _rx) = table(&[DeviceType::Idfa]);
        assert!(routes.route("idfa").is_some());
        assert!(routes.route("gaid").is_none());
        assert!(routes.route("xyz").is_none());
        assert!(routes.route("IDFA").is_none());
    }

    #[tokio::test]
    async fn test_processor_routes_and_drops() {
        let (routes, mut receivers) = table(&[DeviceType::Idfa, DeviceType::Gaid]);
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = hand_off(16);

        for line in [
            "idfa\tA\t1.0\t2.0\t1,2",
            "gaid\tB\t3.0\t4.0\t5",
            "adid\tC\t1\t1\t1",
            "xyz\tD\t1\t1\t1",
            "idfa\tE\t1\t1",
            "idfa\t\t1\t1\t1",
            "idfa\tF\tnorth\t1\t1",
            "idfa\tG\t1\t1\t1,x",
        ] {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        LineProcessor::new(0, Arc::clone(&routes), Arc::clone(&stats))
            .run(rx)
            .await;
        drop(routes);

        let idfa = receivers.get_mut(&DeviceType::Idfa).unwrap();
        let item = idfa.recv().await.unwrap();
        assert_eq!(item.key, "idfa:A");
        assert_eq!(codec::decode(&item.value).unwrap().apps, vec![1, 2]);
        assert!(idfa.recv().await.is_none());

        let gaid = receivers.get_mut(&DeviceType::Gaid).unwrap();
        assert_eq!(gaid.recv().await.unwrap().key, "gaid:B");

        let summary = stats.snapshot(0);
        assert_eq!(stats.items_routed(), 2);
        assert_eq!(summary.dropped.unroutable_record, 2);
        assert_eq!(summary.dropped.malformed_line, 1);
        assert_eq!(summary.dropped.missing_identity, 1);
        assert_eq!(summary.dropped.invalid_coordinate, 1);
        assert_eq!(summary.dropped.invalid_app_id, 1);
    }
}
