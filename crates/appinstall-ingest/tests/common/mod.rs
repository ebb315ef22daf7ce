//! Shared fixtures for the loader integration tests

#![allow(dead_code)]

use appinstall_common::types::DeviceType;
use appinstall_ingest::pipeline::{PipelineConfig, QueueCapacities, RetryPolicy};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write `lines` as a gzip file named `name` inside `dir`
pub fn write_gz(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::fast());
    for line in lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap();
    path
}

/// `count` well-formed lines for `device_type`, ids prefixed with `tag`
pub fn install_lines(device_type: &str, tag: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}\t{}-{}\t55.55\t37.37\t{},{}", device_type, tag, i, i, i + 1))
        .collect()
}

/// Glob matching every `.tsv.gz` file in `dir`
pub fn pattern(dir: &Path) -> String {
    format!("{}/*.tsv.gz", dir.display())
}

/// All four partitions, small pools and queues, near-instant retries
pub fn test_config() -> PipelineConfig {
    let partitions: BTreeMap<DeviceType, String> = DeviceType::ALL
        .into_iter()
        .map(|d| (d, format!("mem:{}", d)))
        .collect();

    PipelineConfig {
        partitions,
        file_workers: 2,
        line_workers: 4,
        connections_per_partition: 2,
        queues: QueueCapacities {
            files: 4,
            lines: 64,
            items: 16,
        },
        retry: RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        },
        mark_completed: true,
        run_timeout: None,
    }
}
