//! Error handling for the BLE HID bridge CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] blehid_core::BlehidError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),

    #[error("{0}")]
    Other(String),
}

impl CliError {
    /// Operator steps printed alongside the error
    pub fn remediation(&self) -> Vec<&'static str> {
        match self {
            CliError::Bridge(err) => err.remediation(),
            CliError::Config(_) => vec!["Check blehid.toml and BLEHID_* environment variables"],
            CliError::FeatureNotAvailable(_) => {
                vec!["Run with --simulate to use the in-process GATT provider"]
            }
            _ => Vec::new(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err.to_string())
    }
}
