use crate::domain::config::{BridgeConfig, BridgeMode, ConfigFile, LinkConfig, RetryPolicy};
use crate::domain::error::{BridgeError, BridgeResult};
use crate::domain::settings::SerialSettings;
use crate::infrastructure::identity::{resolve_group, resolve_user};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration manager
pub struct ConfigManager {
    config_path: Option<PathBuf>,
    explicit: bool,
}

impl ConfigManager {
    /// Uses `explicit` when given (it must exist), else the per-user default location.
    pub fn new(explicit: Option<PathBuf>) -> Self {
        match explicit {
            Some(path) => Self {
                config_path: Some(path),
                explicit: true,
            },
            None => Self {
                config_path: Self::default_config_path(),
                explicit: false,
            },
        }
    }

    /// `$XDG_CONFIG_HOME/serbridge/config.toml` or the platform equivalent
    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("serbridge").join("config.toml"))
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Load configuration; a missing default file yields the defaults.
    pub fn load(&self) -> BridgeResult<ConfigFile> {
        match &self.config_path {
            Some(path) if self.explicit || path.exists() => self.load_config_from_path(path),
            _ => Ok(ConfigFile::default()),
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> BridgeResult<ConfigFile> {
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            BridgeError::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Validates `file` and turns it into the configuration consumed by the bridge.
    pub fn resolve(file: ConfigFile) -> BridgeResult<BridgeConfig> {
        let device = file
            .device
            .ok_or_else(|| BridgeError::config("No device given"))?;
        if file.max_connections == 0 {
            return Err(BridgeError::config("Maximum connections must be at least 1"));
        }
        if file.debug > 2 {
            return Err(BridgeError::config(format!(
                "Debug level {} out of range 0..=2",
                file.debug
            )));
        }
        if file.link_mode > 0o7777 {
            return Err(BridgeError::config(format!(
                "Link mode {:o} is not a permission mode",
                file.link_mode
            )));
        }

        let mode = match file.remote {
            Some(host) if !host.is_empty() => BridgeMode::Client {
                host,
                port: file.port,
            },
            _ => BridgeMode::Server { port: file.port },
        };

        let link = file.link.map(|path| LinkConfig {
            path,
            owner: resolve_user(&file.user),
            group: resolve_group(&file.group),
            mode: file.link_mode,
        });

        Ok(BridgeConfig {
            device,
            mode,
            max_connections: file.max_connections,
            write_only: file.write_only,
            debug: file.debug,
            settings: file.stty.as_deref().map(SerialSettings::parse),
            link,
            retry: RetryPolicy {
                reconnect_delay: Duration::from_secs(file.reconnect_delay_secs),
                reopen_delay: Duration::from_secs(file.reopen_delay_secs),
            },
        })
    }
}
