//! Pipeline orchestrator
//!
//! Builds the queues and worker pools, dispatches the file list and runs the
//! shutdown sequence:
//!
//! ```text
//! spawn writers → spawn processors → spawn ingestors → dispatch files
//!   → close file queue  → await ingestors
//!   → close line queue  → await processors
//!   → close partition queues → await writers
//! ```

use appinstall_common::types::DeviceType;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::discovery::InputFile;
use super::ingestor::FileIngestor;
use super::processor::{LineProcessor, RoutingTable};
use super::stats::{PipelineStats, RunSummary};
use super::writer::StoreWriter;
use super::{hand_off, PipelineConfig};
use crate::store::StoreConnector;

pub struct Pipeline {
    config: PipelineConfig,
    connector: Arc<dyn StoreConnector>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            config,
            connector,
            stats: Arc::new(PipelineStats::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Live counters, readable while the run is in progress
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Cancelling this token stops dispatch and file reads; queued work drains
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load `files` and return the final counts
    pub async fn run(self, files: Vec<InputFile>) -> RunSummary {
        let Self {
            config,
            connector,
            stats,
            cancel,
        } = self;

        let files_discovered = files.len() as u64;
        info!(
            files = files_discovered,
            partitions = config.partitions.len(),
            file_workers = config.file_workers,
            line_workers = config.line_workers,
            connections_per_partition = config.connections_per_partition,
            "Starting pipeline"
        );

        let timer = config.run_timeout.map(|limit| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(timeout = ?limit, "Run timeout reached, cancelling");
                cancel.cancel();
            })
        });

        // Writers
        let mut routes = HashMap::new();
        let mut writer_groups: Vec<(DeviceType, Vec<JoinHandle<()>>)> = Vec::new();
        for (&partition, addr) in &config.partitions {
            let (tx, rx) = hand_off(config.queues.items);
            let workers = (0..config.connections_per_partition.max(1))
                .map(|id| {
                    let writer = StoreWriter::new(
                        partition,
                        id,
                        connector.connect(partition, addr),
                        config.retry,
                        Arc::clone(&stats),
                        cancel.clone(),
                    );
                    tokio::spawn(writer.run(rx.clone()))
                })
                .collect();
            routes.insert(partition, tx);
            writer_groups.push((partition, workers));
        }
        let routes = Arc::new(RoutingTable::new(routes));

        // Processors
        let (line_tx, line_rx) = hand_off(config.queues.lines);
        let processors: Vec<_> = (0..config.line_workers.max(1))
            .map(|id| {
                let processor = LineProcessor::new(id, Arc::clone(&routes), Arc::clone(&stats));
                tokio::spawn(processor.run(line_rx.clone()))
            })
            .collect();
        drop(line_rx);

        // Ingestors
        let (file_tx, file_rx) = hand_off(config.queues.files);
        let ingestors: Vec<_> = (0..config.file_workers.max(1))
            .map(|id| {
                let ingestor = FileIngestor::new(
                    id,
                    line_tx.clone(),
                    Arc::clone(&stats),
                    cancel.clone(),
                    config.mark_completed,
                );
                tokio::spawn(ingestor.run(file_rx.clone()))
            })
            .collect();
        drop(file_rx);

        // Dispatch
        let mut dispatched = 0u64;
        for file in files {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(dispatched, remaining = files_discovered - dispatched, "Dispatch cancelled");
                    break;
                }
                sent = file_tx.send(file) => {
                    if sent.is_err() {
                        error!("File queue closed before dispatch finished");
                        break;
                    }
                    dispatched += 1;
                }
            }
        }
        debug!(dispatched, "Dispatch finished");

        drop(file_tx);
        await_pool("ingestor", ingestors).await;
        info!(lines = stats.lines_read(), "Ingestors done");

        drop(line_tx);
        await_pool("processor", processors).await;
        info!(items = stats.items_routed(), "Processors done");

        drop(routes);
        join_all(writer_groups.into_iter().map(|(partition, workers)| async move {
            await_pool("writer", workers).await;
            debug!(partition = %partition, "Partition writers done");
        }))
        .await;

        if let Some(timer) = timer {
            timer.abort();
        }

        let mut summary = stats.snapshot(files_discovered);
        summary.cancelled = cancel.is_cancelled();

        info!(
            files_completed = summary.files_completed,
            files_failed = summary.files_failed,
            files_unfinished = summary.files_unfinished,
            lines_read = summary.lines_read,
            dropped = summary.dropped.total(),
            items_written = summary.items_written,
            items_failed = summary.items_failed,
            cancelled = summary.cancelled,
            "Pipeline finished"
        );

        summary
    }
}

async fn await_pool(stage: &str, workers: Vec<JoinHandle<()>>) {
    for result in join_all(workers).await {
        if let Err(e) = result {
            error!(stage, error = %e, "Worker task failed");
        }
    }
}
