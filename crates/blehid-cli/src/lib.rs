//! BLE HID bridge command line application
//!
//! Wires the GATT transport, circuit breaker, health monitor and advertisement
//! manager together and feeds them keystrokes typed on stdin.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::{BridgeApp, Platform};
pub use cli::{Cli, Commands};
pub use config::{AppConfig, ConfigError};
pub use error::{CliError, Result};
