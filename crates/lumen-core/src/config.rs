//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//! 1. Compiled defaults (the firmware constants and design timeouts)
//! 2. An optional TOML file
//! 3. `LUMEN_`-prefixed environment variables, `__` separating sections
//!    (`LUMEN_DEVICE__NAME`, `LUMEN_SCAN__TIMEOUT_SECS`, ...)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::{DEVICE_NAME, LED_COMMAND_UUID, LED_SERVICE_UUID};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "LUMEN_CONFIG";

/// Longest local name that fits a legacy advertisement packet.
pub const MAX_DEVICE_NAME_LEN: usize = 29;

/// Bounds for scan and connect timeouts, in seconds.
pub const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=300;

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),

    /// The file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target peripheral and GATT addressing.
    pub device: DeviceConfig,
    /// Discovery scan settings.
    pub scan: ScanConfig,
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Identity of the peripheral and its command characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised name matched exactly during scans.
    pub name: String,
    /// Service containing the command characteristic.
    pub service_uuid: Uuid,
    /// Command characteristic.
    pub characteristic_uuid: Uuid,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEVICE_NAME.to_string(),
            service_uuid: LED_SERVICE_UUID,
            characteristic_uuid: LED_COMMAND_UUID,
        }
    }
}

/// Discovery scan settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long a scan runs before giving up.
    pub timeout_secs: u64,
    /// Start a scan right after permissions are granted at startup.
    pub auto_start: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            auto_start: false,
        }
    }
}

impl ScanConfig {
    /// Scan timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long a connect call may take.
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

impl ConnectionConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when neither `RUST_LOG` nor `LUMEN_LOG_LEVEL` is set.
    pub level: String,
    /// JSON file logging plus compact stdout, instead of pretty stdout.
    pub production: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            production: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Uses `LUMEN_CONFIG` when set (the file must then exist), otherwise the
    /// platform path if a file is present there.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Some(Path::new(&path)), true),
            None => {
                let path = default_config_path();
                Self::load_from(path.as_deref(), false)
            }
        }
    }

    /// Load configuration layered over `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `required` is set and the file is missing, if a
    /// source cannot be parsed, or if validation fails.
    pub fn load_from(path: Option<&Path>, required: bool) -> ConfigResult<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            if required && !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(required),
            );
        }

        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix("LUMEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.device.name.is_empty() {
            errors.push(ConfigError::ValidationError {
                field: "device.name",
                message: "must not be empty".to_string(),
            });
        } else if self.device.name.len() > MAX_DEVICE_NAME_LEN {
            errors.push(ConfigError::ValidationError {
                field: "device.name",
                message: format!(
                    "must be at most {MAX_DEVICE_NAME_LEN} bytes (got {})",
                    self.device.name.len()
                ),
            });
        }

        if self.device.service_uuid.is_nil() {
            errors.push(ConfigError::ValidationError {
                field: "device.service_uuid",
                message: "must not be nil".to_string(),
            });
        }
        if self.device.characteristic_uuid.is_nil() {
            errors.push(ConfigError::ValidationError {
                field: "device.characteristic_uuid",
                message: "must not be nil".to_string(),
            });
        }
        if self.device.service_uuid == self.device.characteristic_uuid {
            errors.push(ConfigError::ValidationError {
                field: "device.characteristic_uuid",
                message: "must differ from device.service_uuid".to_string(),
            });
        }

        for (field, secs) in [
            ("scan.timeout_secs", self.scan.timeout_secs),
            ("connection.timeout_secs", self.connection.timeout_secs),
        ] {
            if !TIMEOUT_RANGE_SECS.contains(&secs) {
                errors.push(ConfigError::ValidationError {
                    field,
                    message: format!(
                        "must be between {} and {} seconds (got {secs})",
                        TIMEOUT_RANGE_SECS.start(),
                        TIMEOUT_RANGE_SECS.end()
                    ),
                });
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// The platform configuration file path.
///
/// On Linux: `/etc/lumen/config.toml`
/// Elsewhere: the user config directory, e.g. `~/Library/Application Support/lumen/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/etc/lumen/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "lumen").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
