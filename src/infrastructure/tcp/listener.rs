use crate::domain::config::LISTEN_BACKLOG;
use crate::domain::error::{BridgeError, BridgeResult};
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tracing::debug;

/// Accepting socket of server mode.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Listens on `port` on all IPv4 interfaces.
    pub fn bind(port: u16) -> BridgeResult<Self> {
        Self::bind_addr(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
    }

    /// Creates, binds and listens step by step so each failure keeps its own exit code.
    pub fn bind_addr(addr: SocketAddrV4) -> BridgeResult<Self> {
        // SAFETY: socket(2) takes only integer arguments.
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_TCP) };
        if fd == -1 {
            return Err(BridgeError::Socket(io::Error::last_os_error()));
        }
        // SAFETY: `fd` was just returned by socket(2) and is owned by nobody else.
        let socket = unsafe { OwnedFd::from_raw_fd(fd) };

        let reuse: libc::c_int = 1;
        // SAFETY: `reuse` is a live c_int and the length matches it.
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &reuse as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(BridgeError::Socket(io::Error::last_os_error()));
        }

        // SAFETY: sockaddr_in is plain old data; zeroing also covers platform padding.
        let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_port = addr.port().to_be();
        sin.sin_addr = libc::in_addr {
            s_addr: u32::from(*addr.ip()).to_be(),
        };
        // SAFETY: `sin` is a fully initialised sockaddr_in and the length matches it.
        let rc = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(BridgeError::Bind {
                port: addr.port(),
                source: io::Error::last_os_error(),
            });
        }
        debug!(port = addr.port(), "Bound port");

        // SAFETY: `socket` owns a valid descriptor for the duration of the call.
        if unsafe { libc::listen(socket.as_raw_fd(), LISTEN_BACKLOG) } == -1 {
            return Err(BridgeError::Listen(io::Error::last_os_error()));
        }
        debug!(backlog = LISTEN_BACKLOG, "Done listen");

        let std_listener = std::net::TcpListener::from(socket);
        std_listener.set_nonblocking(true).map_err(BridgeError::Listen)?;
        let local_addr = std_listener.local_addr().map_err(BridgeError::Listen)?;

        Ok(Self {
            inner: TcpListener::from_std(std_listener),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts one pending connection; the stream is non-blocking.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept()
    }

    pub fn source_mut(&mut self) -> &mut TcpListener {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback_any_port() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[test]
    fn test_bind_reports_local_addr() {
        let listener = Listener::bind_addr(loopback_any_port()).unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().ip().is_loopback());
    }

    #[test]
    fn test_port_in_use_is_bind_error() {
        let first = Listener::bind_addr(loopback_any_port()).unwrap();
        let port = first.local_addr().port();

        let err = Listener::bind_addr(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).unwrap_err();
        assert!(matches!(err, BridgeError::Bind { port: p, .. } if p == port));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_accept_pending_connection() {
        let listener = Listener::bind_addr(loopback_any_port()).unwrap();
        let would_block = listener.accept().unwrap_err();
        assert_eq!(would_block.kind(), io::ErrorKind::WouldBlock);

        let client = std::net::TcpStream::connect(listener.local_addr()).unwrap();
        let mut accepted = None;
        for _ in 0..100 {
            match listener.accept() {
                Ok(pair) => {
                    accepted = Some(pair);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                Err(e) => panic!("accept failed: {}", e),
            }
        }

        let (_stream, remote) = accepted.expect("connection was not accepted");
        assert_eq!(remote, client.local_addr().unwrap());
    }
}
