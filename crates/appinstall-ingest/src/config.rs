//! Loader configuration
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! YAML file, and `APPINSTALL__*` environment variables (nested keys joined
//! with `__`, e.g. `APPINSTALL__MEMC__RETRY_COUNT=5`).
//!
//! Layers merge per key, partitions included: overriding one endpoint keeps
//! the other default partitions. An empty endpoint disables a partition.

use anyhow::{Context, Result};
use appinstall_common::types::DeviceType;
use appinstall_common::AppInstallError;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::{PipelineConfig, QueueCapacities, RetryPolicy};

// ============================================================================
// Loader Configuration Constants
// ============================================================================

/// Default glob pattern for input files.
pub const DEFAULT_PATTERN: &str = "/data/appsinstalled/*.tsv.gz";

/// Default memcached socket timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default number of attempts per store write.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default pause between store write attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default number of writer connections per partition endpoint.
pub const DEFAULT_MAX_CONNECTIONS_PER_SERVER: usize = 4;

/// Default number of files decompressed concurrently.
pub const DEFAULT_MAX_OPEN_FILES: usize = 4;

/// Default number of line processors per available CPU.
pub const DEFAULT_LINE_WORKERS_PER_CPU: usize = 2;

/// Default capacity of the file path queue.
pub const DEFAULT_FILE_QUEUE_CAPACITY: usize = 16;

/// Default capacity of the raw line queue.
pub const DEFAULT_LINE_QUEUE_CAPACITY: usize = 4_096;

/// Default capacity of each partition's item queue.
pub const DEFAULT_ITEM_QUEUE_CAPACITY: usize = 1_024;

/// Error rate above which a load is reported as failed.
pub const DEFAULT_MAX_ERROR_RATE: f64 = 0.01;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "APPINSTALL";

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Glob pattern resolved into the input file list
    pub pattern: String,

    /// Device type -> memcached endpoint (`host:port`); empty disables it
    pub partitions: BTreeMap<String, String>,

    /// Store connection settings
    pub memc: MemcConfig,

    /// Maximum number of files read concurrently
    pub max_open_files: usize,

    /// Line processors per available CPU
    pub line_workers_per_cpu: usize,

    /// Hand-off queue capacities
    pub queues: QueueConfig,

    /// Cancel the run after this many seconds
    pub run_timeout_secs: Option<u64>,

    /// Log items instead of writing them and leave input files unmarked
    pub dry_run: bool,

    /// Highest acceptable share of failed lines
    pub max_error_rate: f64,
}

/// Store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemcConfig {
    pub connect_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub max_connections_per_server: usize,
}

/// Hand-off queue capacities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub files: usize,
    pub lines: usize,
    pub items: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let partitions = [
            (DeviceType::Idfa, "127.0.0.1:33013"),
            (DeviceType::Gaid, "127.0.0.1:33014"),
            (DeviceType::Adid, "127.0.0.1:33015"),
            (DeviceType::Dvid, "127.0.0.1:33016"),
        ]
        .into_iter()
        .map(|(device_type, addr)| (device_type.to_string(), addr.to_string()))
        .collect();

        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            partitions,
            memc: MemcConfig::default(),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            line_workers_per_cpu: DEFAULT_LINE_WORKERS_PER_CPU,
            queues: QueueConfig::default(),
            run_timeout_secs: None,
            dry_run: false,
            max_error_rate: DEFAULT_MAX_ERROR_RATE,
        }
    }
}

impl Default for MemcConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_connections_per_server: DEFAULT_MAX_CONNECTIONS_PER_SERVER,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            files: DEFAULT_FILE_QUEUE_CAPACITY,
            lines: DEFAULT_LINE_QUEUE_CAPACITY,
            items: DEFAULT_ITEM_QUEUE_CAPACITY,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from an optional YAML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder().add_source(defaults()?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: LoaderConfig = builder
            .build()
            .context("Failed to read loader configuration")?
            .try_deserialize()
            .context("Failed to deserialize loader configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document, without environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LoaderConfig = config::Config::builder()
            .add_source(defaults()?)
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .context("Failed to read loader configuration")?
            .try_deserialize()
            .context("Failed to deserialize loader configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> appinstall_common::Result<()> {
        if self.pattern.trim().is_empty() {
            return Err(AppInstallError::config("pattern cannot be empty"));
        }

        if self.device_partitions()?.is_empty() {
            return Err(AppInstallError::config("at least one partition must be configured"));
        }

        if self.memc.retry_count == 0 {
            return Err(AppInstallError::config("memc.retry_count must be greater than 0"));
        }

        if self.memc.connect_timeout_ms == 0 {
            return Err(AppInstallError::config("memc.connect_timeout_ms must be greater than 0"));
        }

        if self.memc.max_connections_per_server == 0 {
            return Err(AppInstallError::config(
                "memc.max_connections_per_server must be greater than 0",
            ));
        }

        if self.max_open_files == 0 {
            return Err(AppInstallError::config("max_open_files must be greater than 0"));
        }

        if self.line_workers_per_cpu == 0 {
            return Err(AppInstallError::config("line_workers_per_cpu must be greater than 0"));
        }

        if self.queues.files == 0 || self.queues.lines == 0 || self.queues.items == 0 {
            return Err(AppInstallError::config("queue capacities must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(AppInstallError::config(format!(
                "max_error_rate must be within 0.0..=1.0, got {}",
                self.max_error_rate
            )));
        }

        Ok(())
    }

    /// Enabled partitions keyed by their validated device type
    pub fn device_partitions(&self) -> appinstall_common::Result<BTreeMap<DeviceType, String>> {
        let mut partitions = BTreeMap::new();

        for (name, addr) in &self.partitions {
            let device_type: DeviceType = name.parse().map_err(|_| {
                AppInstallError::config(format!(
                    "unknown partition '{}', expected one of: {}",
                    name,
                    DeviceType::ALL.map(|d| d.as_str()).join(", ")
                ))
            })?;

            if addr.trim().is_empty() {
                continue;
            }

            partitions.insert(device_type, addr.trim().to_string());
        }

        Ok(partitions)
    }

    /// Socket timeout for each store operation
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.memc.connect_timeout_ms)
    }

    /// Overall run timeout, if configured
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Number of line processors for this machine
    pub fn line_workers(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus * self.line_workers_per_cpu
    }

    /// Resolve the settings the pipeline runs with
    pub fn pipeline_config(&self) -> appinstall_common::Result<PipelineConfig> {
        self.validate()?;

        Ok(PipelineConfig {
            partitions: self.device_partitions()?,
            file_workers: self.max_open_files,
            line_workers: self.line_workers(),
            connections_per_partition: self.memc.max_connections_per_server,
            queues: QueueCapacities {
                files: self.queues.files,
                lines: self.queues.lines,
                items: self.queues.items,
            },
            retry: RetryPolicy {
                max_attempts: self.memc.retry_count,
                delay: Duration::from_millis(self.memc.retry_delay_ms),
            },
            mark_completed: !self.dry_run,
            run_timeout: self.run_timeout(),
        })
    }
}

/// Built-in defaults as the lowest-precedence configuration layer
fn defaults() -> Result<config::Config> {
    config::Config::try_from(&LoaderConfig::default()).context("Failed to build default configuration")
}
