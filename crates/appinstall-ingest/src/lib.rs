//! Appinstall Loader Library
//!
//! Loads gzip-compressed app-install logs into partitioned memcached.
//!
//! # Pipeline
//!
//! - **discovery**: resolve a glob pattern into files not yet marked completed
//! - **ingestor**: decompress files and stream their lines
//! - **processor**: parse, encode and route each line by device type
//! - **writer**: write items to their partition with bounded retry
//!
//! # Example
//!
//! ```no_run
//! use appinstall_ingest::config::LoaderConfig;
//! use appinstall_ingest::pipeline::{discover, Pipeline};
//! use appinstall_ingest::store::MemcacheConnector;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig::load(None)?;
//!     let files = discover(&config.pattern)?;
//!
//!     let connector = Arc::new(MemcacheConnector::new(config.connect_timeout()));
//!     let summary = Pipeline::new(config.pipeline_config()?, connector).run(files).await;
//!
//!     println!("{} items written", summary.items_written);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod codec;
pub mod config;
pub mod pipeline;
pub mod store;
