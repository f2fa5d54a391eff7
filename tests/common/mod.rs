//! Shared fixtures for the bridge integration tests.
#![allow(dead_code)]

use serbridge::domain::config::RetryPolicy;
use serbridge::infrastructure::serial::{DeviceChannel, DeviceOpener, DeviceSetup};
use serbridge::{Bridge, BridgeOptions, BridgeResult, BridgeStats, PeerSource, ShutdownTrigger};
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out queued open results; an empty queue looks like an unplugged device.
#[derive(Clone, Default)]
pub struct QueuedOpener {
    queue: Arc<Mutex<VecDeque<io::Result<File>>>>,
    attempts: Arc<AtomicUsize>,
}

impl QueuedOpener {
    pub fn push_device(&self) -> UnixStream {
        let (file, far_end) = socket_device();
        self.queue.lock().unwrap().push_back(Ok(file));
        far_end
    }

    pub fn push_error(&self, errno: i32) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Err(io::Error::from_raw_os_error(errno)));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl DeviceOpener for QueuedOpener {
    fn open(&mut self) -> io::Result<File> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::from_raw_os_error(libc::ENOENT)))
    }

    fn describe(&self) -> String {
        "queued-device".to_string()
    }
}

#[derive(Clone, Default)]
pub struct CountingSetup {
    pub prepared: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl DeviceSetup for CountingSetup {
    fn prepare(&mut self, _device: &File) -> BridgeResult<()> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Non-blocking socket pair standing in for a character device.
///
/// Returns the bridge's end as a `File` and the far end for the test to drive.
pub fn socket_device() -> (File, UnixStream) {
    let (ours, theirs) = std::os::unix::net::UnixStream::pair().unwrap();
    ours.set_nonblocking(true).unwrap();
    theirs.set_nonblocking(true).unwrap();
    (
        File::from(OwnedFd::from(ours)),
        UnixStream::from_std(theirs).unwrap(),
    )
}

pub fn options(max_connections: usize) -> BridgeOptions {
    BridgeOptions {
        max_connections,
        write_only: false,
        retry: RetryPolicy {
            reconnect_delay: Duration::from_millis(50),
            reopen_delay: Duration::from_millis(50),
        },
    }
}

/// Opens the first queued device and builds a bridge around it.
pub fn build_bridge(
    opener: &QueuedOpener,
    setup: &CountingSetup,
    source: PeerSource,
    options: BridgeOptions,
) -> Bridge {
    let device = DeviceChannel::open(Box::new(opener.clone()), Box::new(setup.clone())).unwrap();
    Bridge::new(device, source, options).unwrap()
}

/// A bridge running on its own thread.
pub struct RunningBridge {
    pub addr: Option<SocketAddr>,
    trigger: ShutdownTrigger,
    handle: JoinHandle<BridgeResult<BridgeStats>>,
}

impl RunningBridge {
    pub fn spawn(bridge: Bridge) -> Self {
        let addr = bridge.local_addr().map(|addr| {
            SocketAddr::from(([127, 0, 0, 1], addr.port()))
        });
        let trigger = bridge.shutdown_trigger();
        let handle = std::thread::spawn(move || bridge.run());
        Self {
            addr,
            trigger,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr.expect("bridge has no listener")
    }

    /// Waits for the bridge to stop on its own, e.g. after a fatal error.
    pub fn join(self) -> BridgeResult<BridgeStats> {
        self.handle.join().expect("bridge thread panicked")
    }

    pub fn stop(self) -> BridgeStats {
        self.trigger.trigger();
        self.join().expect("bridge failed")
    }
}

pub async fn read_exactly<R: AsyncReadExt + Unpin>(reader: &mut R, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(IO_TIMEOUT, reader.read_exact(&mut buf))
        .await
        .expect("timed out waiting for data")
        .expect("read failed");
    buf
}

/// Asserts nothing arrives on `reader` within `wait`.
pub async fn assert_silent<R: AsyncReadExt + Unpin>(reader: &mut R, wait: Duration) {
    let mut buf = [0u8; 64];
    if let Ok(result) = tokio::time::timeout(wait, reader.read(&mut buf)).await {
        match result {
            Ok(n) => panic!("unexpected {} bytes: {:?}", n, &buf[..n]),
            Err(e) => panic!("unexpected read error: {}", e),
        }
    }
}

/// Asserts `reader` reaches end of stream.
pub async fn assert_closed<R: AsyncReadExt + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 64];
    let result = tokio::time::timeout(IO_TIMEOUT, reader.read(&mut buf))
        .await
        .expect("timed out waiting for close");
    match result {
        Ok(0) => {}
        Ok(n) => panic!("expected close, got {} bytes", n),
        Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
    }
}

pub async fn send<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) {
    writer.write_all(data).await.expect("write failed");
}
