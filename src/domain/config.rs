use crate::domain::settings::SerialSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// TCP port used when none is configured.
pub const DEFAULT_PORT: u16 = 23000;
/// Backlog of the listening socket in server mode.
pub const LISTEN_BACKLOG: i32 = 4;
/// Largest single read from the device or from a peer. Not a message boundary.
pub const CHUNK_SIZE: usize = 512;

/// On-disk configuration, every field optional with the classic defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Serial port or pseudo-terminal master
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,
    /// Remote machine; absent means server mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub write_only: bool,
    /// Log detail, 0..=2
    #[serde(default)]
    pub debug: u8,
    /// stty-like settings string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stty: Option<String>,
    /// Symlink published for the pty slave
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<PathBuf>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_link_mode")]
    pub link_mode: u32,
    #[serde(default)]
    pub daemon: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_reopen_delay")]
    pub reopen_delay_secs: u64,
}

// Default value functions
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connections() -> usize {
    1
}

fn default_user() -> String {
    "pi".to_string()
}

fn default_group() -> String {
    "dialout".to_string()
}

fn default_link_mode() -> u32 {
    0o660
}

fn default_reconnect_delay() -> u64 {
    10
}

fn default_reopen_delay() -> u64 {
    1
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            device: None,
            remote: None,
            port: default_port(),
            max_connections: default_max_connections(),
            write_only: false,
            debug: 0,
            stty: None,
            link: None,
            user: default_user(),
            group: default_group(),
            link_mode: default_link_mode(),
            daemon: false,
            log_file: None,
            reconnect_delay_secs: default_reconnect_delay(),
            reopen_delay_secs: default_reopen_delay(),
        }
    }
}

/// Which side of the TCP connection the bridge plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMode {
    /// Listen on all interfaces and accept peers.
    Server { port: u16 },
    /// Keep one outbound connection to `host:port` alive.
    Client { host: String, port: u16 },
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeMode::Server { port } => write!(f, "server on port {}", port),
            BridgeMode::Client { host, port } => write!(f, "client of {}:{}", host, port),
        }
    }
}

/// Fixed delays of the two unbounded retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between outbound connection attempts.
    pub reconnect_delay: Duration,
    /// Pause between device re-open attempts.
    pub reopen_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(default_reconnect_delay()),
            reopen_delay: Duration::from_secs(default_reopen_delay()),
        }
    }
}

/// Pty slave publication settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub path: PathBuf,
    /// `None` leaves the slave's owner unchanged.
    pub owner: Option<u32>,
    /// `None` leaves the slave's group unchanged.
    pub group: Option<u32>,
    pub mode: u32,
}

/// Fully resolved configuration handed to the bridge core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub device: PathBuf,
    pub mode: BridgeMode,
    pub max_connections: usize,
    pub write_only: bool,
    pub debug: u8,
    pub settings: Option<SerialSettings>,
    pub link: Option<LinkConfig>,
    pub retry: RetryPolicy,
}
