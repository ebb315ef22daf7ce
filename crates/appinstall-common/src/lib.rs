//! Appinstall Common Library
//!
//! Shared types, logging, and error handling for the appinstall workspace.
//!
//! - **Error Handling**: [`AppInstallError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: device types and the install record carried through the loader
//!
//! # Example
//!
//! ```no_run
//! use appinstall_common::types::DeviceType;
//! use appinstall_common::Result;
//!
//! fn partition_for(raw: &str) -> Result<DeviceType> {
//!     raw.parse()
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{AppInstallError, Result};
