use std::io;
use thiserror::Error;

/// serbridge unified error type
///
/// Every variant except `Config` and `Io` corresponds to one fatal condition with its
/// own process exit code, see [`BridgeError::exit_code`].
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Open of {path} failed: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Re-open of {path} failed: {source}")]
    DeviceReopen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't determine address of {host}")]
    Resolve { host: String },

    #[error("Can't open socket: {0}")]
    Socket(#[source] io::Error),

    #[error("Couldn't bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Socket listen failed: {0}")]
    Listen(#[source] io::Error),

    #[error("Cannot create link for pseudo-tty: {message}: {source}")]
    PtyLink {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("Can't open outbound socket: {0}")]
    OutboundSocket(#[source] io::Error),

    #[error("Event loop failure: {0}")]
    EventLoop(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Process exit code reported for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config { .. } | BridgeError::Io(_) => 1,
            BridgeError::DeviceOpen { .. } => 2,
            BridgeError::Resolve { .. } => 3,
            BridgeError::Socket(_) => 4,
            BridgeError::Bind { .. } => 5,
            BridgeError::Listen(_) => 6,
            BridgeError::DeviceReopen { .. } => 7,
            BridgeError::PtyLink { .. } => 8,
            BridgeError::OutboundSocket(_) => 9,
            BridgeError::EventLoop(_) => 10,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
