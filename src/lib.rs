//! serbridge library
//!
//! Shares one serial port or pseudo-terminal with TCP peers, either accepting them
//! (server mode) or keeping one outbound connection alive (client mode).

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use core::bridge::{Bridge, BridgeOptions, BridgeStats, PeerSource};
pub use core::shutdown::{ShutdownFlag, ShutdownTrigger};
pub use domain::config::{BridgeConfig, BridgeMode, ConfigFile, RetryPolicy};
pub use domain::error::{BridgeError, BridgeResult};
pub use domain::settings::SerialSettings;
