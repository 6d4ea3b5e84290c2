//! Layered configuration for the bridge CLI
//!
//! Sources, lowest precedence first: built-in defaults, `blehid.toml` in the
//! working directory, `~/.config/blehid/config.toml`, an explicit `--config`
//! file, then `BLEHID_*` environment variables. Nested keys use a double
//! underscore: `BLEHID_TRANSPORT__DEVICE_NAME="Desk Keyboard"`.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use blehid_core::advertisement::strategy_by_name;
use blehid_core::{CircuitBreakerConfig, HealthMonitorConfig, TransportConfig};

pub const LOCAL_CONFIG_FILE: &str = "blehid.toml";
pub const ENV_PREFIX: &str = "BLEHID_";

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Loading(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Process-level bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Adapter name; the default adapter when unset
    pub adapter: Option<String>,
    /// Advertisement strategy name
    pub strategy: String,
    /// Use the simulated GATT provider instead of the platform one
    pub simulate: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            strategy: "balanced".to_string(),
            simulate: false,
        }
    }
}

/// Complete CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub transport: TransportConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthMonitorConfig,
}

impl AppConfig {
    /// Load every configuration layer and validate the result
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(LOCAL_CONFIG_FILE));

        if let Some(user) = Self::default_config_path() {
            figment = figment.merge(Toml::file(user));
        }
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::Loading(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load defaults overlaid with a single file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()));

        let config: AppConfig = figment.extract().map_err(|e| {
            ConfigError::Loading(format!(
                "Failed to load from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// `~/.config/blehid/config.toml` on Linux, the platform equivalent elsewhere
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("blehid").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.circuit_breaker
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.health
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if strategy_by_name(&self.bridge.strategy).is_none() {
            return Err(ConfigError::Validation(format!(
                "Unknown advertisement strategy: {}",
                self.bridge.strategy
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Write the configuration, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        std::fs::write(path.as_ref(), self.to_toml()?)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bridge.strategy, "balanced");
        assert_eq!(config.transport.device_name, "BLE HID Bridge");
    }

    #[test]
    fn test_local_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                LOCAL_CONFIG_FILE,
                r#"
                [transport]
                device_name = "Desk Keyboard"
                advertising_interval_ms = 250

                [circuit_breaker]
                failure_threshold = 2
                "#,
            )?;
            jail.set_env("BLEHID_TRANSPORT__DEVICE_NAME", "Living Room Remote");
            jail.set_env("BLEHID_BRIDGE__STRATEGY", "power_saver");

            let config = AppConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.transport.device_name, "Living Room Remote");
            assert_eq!(config.transport.advertising_interval_ms, 250);
            assert_eq!(config.circuit_breaker.failure_threshold, 2);
            assert_eq!(config.bridge.strategy, "power_saver");
            // Untouched sections keep their defaults
            assert_eq!(config.health, HealthMonitorConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_overrides_local_file() {
        Jail::expect_with(|jail| {
            jail.create_file(LOCAL_CONFIG_FILE, "[transport]\ndevice_name = \"Local\"\n")?;
            jail.create_file("bridge.toml", "[transport]\ndevice_name = \"Explicit\"\n")?;

            let config =
                AppConfig::load(Some(Path::new("bridge.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.transport.device_name, "Explicit");
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_| {
            let result = AppConfig::load(Some(Path::new("absent.toml")));
            assert!(matches!(result, Err(ConfigError::Loading(_))));
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_unknown_strategy() {
        let mut config = AppConfig::default();
        config.bridge.strategy = "turbo".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[circuit_breaker]\nfailure_threshold = 0\n")?;
            let result = AppConfig::load_from_file("bad.toml");
            assert!(matches!(result, Err(ConfigError::Validation(_))));
            Ok(())
        });
    }

    #[test]
    fn test_save_and_reload() {
        Jail::expect_with(|jail| {
            let mut config = AppConfig::default();
            config.transport.device_name = "Saved".to_string();
            config.bridge.adapter = Some("hci1".to_string());

            let path = jail.directory().join("nested").join("config.toml");
            config.save_to_file(&path).map_err(|e| e.to_string())?;

            let reloaded = AppConfig::load_from_file(&path).map_err(|e| e.to_string())?;
            assert_eq!(reloaded, config);
            Ok(())
        });
    }
}
