// Infrastructure module - External dependencies and adapters
pub mod config;
pub mod daemon;
pub mod identity;
pub mod logging;
pub mod serial;
pub mod tcp;
