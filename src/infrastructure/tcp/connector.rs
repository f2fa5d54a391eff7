use crate::core::shutdown::ShutdownFlag;
use crate::domain::error::{BridgeError, BridgeResult};
use mio::net::TcpStream;
use std::io;
use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Outbound side of client mode: keeps dialing one server until it answers.
#[derive(Debug, Clone)]
pub struct Connector {
    host: String,
    addr: SocketAddrV4,
    delay: Duration,
}

impl Connector {
    pub fn new(host: impl Into<String>, addr: SocketAddrV4, delay: Duration) -> Self {
        Self {
            host: host.into(),
            addr,
            delay,
        }
    }

    /// Resolves `host` to its first IPv4 address.
    pub fn resolve(host: &str, port: u16, delay: Duration) -> BridgeResult<Self> {
        let resolve_error = || BridgeError::Resolve {
            host: host.to_string(),
        };
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| resolve_error())?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(resolve_error)?;
        debug!(host, addr = %addr, "Resolved remote machine");
        Ok(Self::new(host, addr, delay))
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// Connects, retrying every `delay` for as long as it takes.
    ///
    /// The wait notice is logged once per call. Returns `Ok(None)` if shutdown is
    /// requested while waiting.
    pub fn connect(&self, shutdown: &ShutdownFlag) -> BridgeResult<Option<TcpStream>> {
        debug!(addr = %self.addr, "Trying to connect");
        let mut wait_logged = false;

        loop {
            if shutdown.is_requested() {
                return Ok(None);
            }

            match std::net::TcpStream::connect(self.addr) {
                Ok(stream) => {
                    stream.set_nonblocking(true).map_err(BridgeError::OutboundSocket)?;
                    if wait_logged {
                        info!(host = %self.host, port = self.addr.port(), "Connected to server");
                    } else {
                        debug!(host = %self.host, port = self.addr.port(), "Connected to server");
                    }
                    return Ok(Some(TcpStream::from_std(stream)));
                }
                Err(e) if is_socket_failure(&e) => return Err(BridgeError::OutboundSocket(e)),
                Err(e) => {
                    trace!(addr = %self.addr, error = %e, "Connect attempt failed");
                    if !wait_logged {
                        info!(host = %self.host, port = self.addr.port(), error = %e, "Waiting for server");
                        wait_logged = true;
                    }
                    if !shutdown.sleep(self.delay) {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// Errors that come from creating the socket itself rather than from the remote end.
fn is_socket_failure(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::EAFNOSUPPORT | libc::EPROTONOSUPPORT)
    )
}
