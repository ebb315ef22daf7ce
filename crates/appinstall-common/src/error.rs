//! Error types shared across the appinstall crates

use thiserror::Error;

/// Result type alias for appinstall operations
pub type Result<T> = std::result::Result<T, AppInstallError>;

/// Main error type for appinstall
#[derive(Error, Debug)]
pub enum AppInstallError {
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppInstallError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
