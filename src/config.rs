//! Application configuration
//!
//! TOML-based configuration with sensible defaults for every field, so a
//! missing or partial file still yields a runnable server. The path is
//! `~/.config/csms-service/config.toml`, overridable via `CSMS_CONFIG`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::interfaces::ws::ServerConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub ocpp: OcppSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcppSection {
    /// Deadline for CSMS→charger calls, seconds.
    pub call_timeout_secs: u64,
    /// Heartbeat interval handed out in BootNotification replies, seconds.
    pub boot_interval_secs: u32,
    /// Delay before post-transaction vendor packets, milliseconds.
    pub post_transaction_delay_ms: u64,
}

impl Default for OcppSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            boot_interval_secs: 30,
            post_transaction_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageSection {
    /// Snapshot file; `None` picks the per-user data path.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
        }
    }

    /// Snapshot path from config, or the default per-user data location.
    pub fn snapshot_path(&self) -> PathBuf {
        self.storage
            .snapshot_path
            .clone()
            .unwrap_or_else(default_snapshot_path)
    }
}

pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("csms-service")
        .join("config.toml")
}

pub fn default_snapshot_path() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("csms-service")
        .join("state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.ocpp.call_timeout_secs, 30);
        assert_eq!(cfg.ocpp.boot_interval_secs, 30);
        assert_eq!(cfg.ocpp.post_transaction_delay_ms, 500);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9100

            [ocpp]
            call_timeout_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.ocpp.call_timeout_secs, 10);
        assert_eq!(cfg.ocpp.boot_interval_secs, 30);
    }
}
