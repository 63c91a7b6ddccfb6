//! Configuration management for the backup server

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::session::{TransferLimits, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_TRANSFERS};

/// Port used when neither `SERVER_PORT` nor the port file provide one
pub const DEFAULT_PORT: u16 = 1357;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is not a valid value: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to read port file {}: {source}", .path.display())]
    PortFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub status: StatusConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub maintenance: MaintenanceConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest request payload accepted before the connection is dropped
    pub max_payload_bytes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    pub session_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
    pub report_timeout_secs: u64,
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_file_size: u64,
    /// Unfinished transfers allowed per session
    pub max_transfers: usize,
}

impl LimitsConfig {
    pub fn transfer_limits(&self) -> TransferLimits {
        TransferLimits {
            max_file_size: self.max_file_size,
            max_transfers: self.max_transfers,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: DEFAULT_PORT,
                max_payload_bytes: 16 * 1024 * 1024,
            },
            status: StatusConfig {
                enabled: true,
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite:./defensive.db".to_string(),
            },
            storage: StorageConfig {
                backup_dir: PathBuf::from("./backup"),
            },
            maintenance: MaintenanceConfig {
                interval_secs: 30,
                session_timeout_secs: 3600,
                transfer_timeout_secs: 600,
                report_timeout_secs: 5,
            },
            limits: LimitsConfig {
                max_file_size: DEFAULT_MAX_FILE_SIZE,
                max_transfers: DEFAULT_MAX_TRANSFERS,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let port = match env::var("SERVER_PORT") {
            Ok(value) => parse_value("SERVER_PORT", &value)?,
            Err(_) => {
                let path = env::var("PORT_INFO_FILE").unwrap_or_else(|_| "port.info".to_string());
                read_port_file(Path::new(&path))?.unwrap_or(DEFAULT_PORT)
            }
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port,
                max_payload_bytes: env_or("MAX_PAYLOAD_BYTES", defaults.server.max_payload_bytes)?,
            },
            status: StatusConfig {
                enabled: env_or("STATUS_ENABLED", defaults.status.enabled)?,
                port: env_or("STATUS_PORT", defaults.status.port)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            storage: StorageConfig {
                backup_dir: env::var("BACKUP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.backup_dir),
            },
            maintenance: MaintenanceConfig {
                interval_secs: env_or(
                    "MAINTENANCE_INTERVAL_SECS",
                    defaults.maintenance.interval_secs,
                )?,
                session_timeout_secs: env_or(
                    "SESSION_TIMEOUT_SECS",
                    defaults.maintenance.session_timeout_secs,
                )?,
                transfer_timeout_secs: env_or(
                    "TRANSFER_TIMEOUT_SECS",
                    defaults.maintenance.transfer_timeout_secs,
                )?,
                report_timeout_secs: env_or(
                    "REPORT_TIMEOUT_SECS",
                    defaults.maintenance.report_timeout_secs,
                )?,
            },
            limits: LimitsConfig {
                max_file_size: env_or("MAX_FILE_SIZE", defaults.limits.max_file_size)?,
                max_transfers: env_or(
                    "MAX_TRANSFERS_PER_SESSION",
                    defaults.limits.max_transfers,
                )?,
            },
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_value(key, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Read the listening port from the first line of a port file
///
/// A missing file is not an error; an unreadable or malformed one is.
pub fn read_port_file(path: &Path) -> Result<Option<u16>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::PortFile {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let line = contents.lines().next().unwrap_or_default();
    parse_value(&path.display().to_string(), line).map(Some)
}
