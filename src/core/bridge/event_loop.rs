use crate::core::bridge::registry::{PeerId, PeerRegistry};
use crate::core::shutdown::{ShutdownFlag, ShutdownTrigger, TERMINATION_SIGNALS};
use crate::domain::config::{BridgeConfig, BridgeMode, RetryPolicy, CHUNK_SIZE};
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::{DeviceChannel, PathOpener, PtyLink, TtySetup};
use crate::infrastructure::tcp::{Connector, Listener};
use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use signal_hook_mio::v1_0::Signals;
use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

const LISTENER: Token = Token(0);
const DEVICE: Token = Token(1);
const SIGNALS: Token = Token(2);
const WAKER: Token = Token(3);

const EVENTS_CAPACITY: usize = 64;

/// Where new peers come from.
pub enum PeerSource {
    /// Server mode: accept on a listening socket.
    Listen(Listener),
    /// Client mode: dial out, and dial again whenever the peer goes away.
    Connect(Connector),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    pub max_connections: usize,
    /// Never read the device, only write peer data to it.
    pub write_only: bool,
    pub retry: RetryPolicy,
}

impl From<&BridgeConfig> for BridgeOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            write_only: config.write_only,
            retry: config.retry,
        }
    }
}

/// Traffic and lifecycle counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub bytes_from_device: u64,
    pub bytes_to_device: u64,
    /// Peer bytes abandoned because shutdown arrived while the device was stalled.
    pub bytes_dropped_to_device: u64,
    pub peers_admitted: u64,
    pub peers_rejected: u64,
    pub peers_closed: u64,
    pub device_opens: u64,
}

/// Readiness of one poll, frozen before any handler runs.
///
/// Peers are listed in registry order as of the snapshot. Peers admitted later in the
/// same iteration are not part of it and get serviced on the next one.
struct Readiness {
    listener: bool,
    device: bool,
    signals: bool,
    peers: Vec<PeerId>,
}

impl Readiness {
    fn collect(events: &Events, registry: &PeerRegistry<TcpStream>) -> Self {
        let mut readiness = Readiness {
            listener: false,
            device: false,
            signals: false,
            peers: Vec::new(),
        };
        let mut ready_peers = HashSet::new();

        for event in events.iter() {
            match event.token() {
                LISTENER => readiness.listener = true,
                DEVICE => readiness.device = true,
                SIGNALS => readiness.signals = true,
                WAKER => {}
                token => {
                    if let Some(id) = PeerId::from_token(token) {
                        ready_peers.insert(id);
                    }
                }
            }
        }

        readiness.peers = registry
            .ids()
            .into_iter()
            .filter(|id| ready_peers.contains(id))
            .collect();
        readiness
    }
}

/// Single-threaded bridge between one character device and its TCP peers.
///
/// Device bytes are copied to every peer in registry order; peer bytes are copied to
/// the device. One blocking [`Poll::poll`] per iteration, no timeout. Within an
/// iteration the listener is serviced first, then the device, then ready peers.
pub struct Bridge {
    poll: Poll,
    events: Events,
    device: DeviceChannel,
    listener: Option<Listener>,
    connector: Option<Connector>,
    registry: PeerRegistry<TcpStream>,
    options: BridgeOptions,
    shutdown: ShutdownFlag,
    waker: Arc<Waker>,
    signals: Option<Signals>,
    stats: BridgeStats,
    torn_down: bool,
}

impl Bridge {
    pub fn new(device: DeviceChannel, source: PeerSource, options: BridgeOptions) -> BridgeResult<Self> {
        let poll = Poll::new().map_err(BridgeError::EventLoop)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER).map_err(BridgeError::EventLoop)?);
        let (listener, connector) = match source {
            PeerSource::Listen(listener) => (Some(listener), None),
            PeerSource::Connect(connector) => (None, Some(connector)),
        };

        let mut bridge = Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            device,
            listener,
            connector,
            registry: PeerRegistry::new(options.max_connections),
            options,
            shutdown: ShutdownFlag::new(),
            waker,
            signals: None,
            stats: BridgeStats::default(),
            torn_down: false,
        };

        if let Some(listener) = &mut bridge.listener {
            bridge
                .poll
                .registry()
                .register(listener.source_mut(), LISTENER, Interest::READABLE)
                .map_err(BridgeError::EventLoop)?;
        }
        bridge.register_device()?;
        Ok(bridge)
    }

    /// Opens the device, then binds or resolves according to `config.mode`.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let opener = PathOpener::new(&config.device, config.write_only);
        let setup = TtySetup::new(config.settings.clone(), config.link.clone().map(PtyLink::new));
        let device = DeviceChannel::open(Box::new(opener), Box::new(setup))?;

        let source = match &config.mode {
            BridgeMode::Server { port } => PeerSource::Listen(Listener::bind(*port)?),
            BridgeMode::Client { host, port } => {
                PeerSource::Connect(Connector::resolve(host, *port, config.retry.reconnect_delay)?)
            }
        };
        Self::new(device, source, BridgeOptions::from(config))
    }

    /// Routes SIGINT, SIGHUP and SIGTERM into an orderly shutdown.
    pub fn handle_signals(&mut self) -> BridgeResult<()> {
        let mut signals = Signals::new(TERMINATION_SIGNALS).map_err(BridgeError::EventLoop)?;
        self.poll
            .registry()
            .register(&mut signals, SIGNALS, Interest::READABLE)
            .map_err(BridgeError::EventLoop)?;
        self.shutdown.register_signals().map_err(BridgeError::EventLoop)?;
        self.signals = Some(signals);
        Ok(())
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger::new(self.shutdown.clone(), Arc::clone(&self.waker))
    }

    /// Address of the listening socket in server mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Listener::local_addr)
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            device_opens: self.device.opens(),
            ..self.stats.clone()
        }
    }

    /// Bridges until shutdown is requested, then releases every descriptor.
    pub fn run(mut self) -> BridgeResult<BridgeStats> {
        info!(
            device = %self.device.name(),
            max_connections = self.options.max_connections,
            write_only = self.options.write_only,
            "Bridge running"
        );
        let result = self.serve();
        self.teardown();
        result.map(|()| self.stats())
    }

    fn serve(&mut self) -> BridgeResult<()> {
        if self.connector.is_some() && !self.connect_peer()? {
            return Ok(());
        }

        loop {
            if self.shutdown.is_requested() {
                return Ok(());
            }

            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(BridgeError::EventLoop(e));
            }

            let ready = Readiness::collect(&self.events, &self.registry);

            if ready.signals {
                self.consume_signals();
            }
            if self.shutdown.is_requested() {
                return Ok(());
            }
            if ready.listener {
                self.accept_peers();
            }
            if ready.device && !self.service_device()? {
                return Ok(());
            }
            for id in ready.peers {
                if !self.service_peer(id)? {
                    return Ok(());
                }
            }
        }
    }

    fn consume_signals(&mut self) {
        if let Some(signals) = &mut self.signals {
            for signal in signals.pending() {
                info!(signal, "Terminating on signal");
                self.shutdown.request();
            }
        }
    }

    fn register_device(&mut self) -> BridgeResult<()> {
        if self.options.write_only {
            return Ok(());
        }
        if let Some(fd) = self.device.raw_fd() {
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), DEVICE, Interest::READABLE)
                .map_err(BridgeError::EventLoop)?;
        }
        Ok(())
    }

    fn deregister_device(&mut self) {
        if self.options.write_only {
            return;
        }
        if let Some(fd) = self.device.raw_fd() {
            if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!(error = %e, "Device deregistration failed");
            }
        }
    }

    /// Admits `stream` and starts watching it. Returns `None` if it was rejected.
    fn install_peer(&mut self, stream: TcpStream, remote: Option<SocketAddr>) -> Option<PeerId> {
        let id = match self.registry.admit(stream, remote) {
            Ok(id) => id,
            Err(e) => {
                self.stats.peers_rejected += 1;
                info!(remote = ?remote, "Rejecting connection: {}", e);
                return None;
            }
        };

        let peer = self.registry.peer_mut(id)?;
        if let Err(e) = self
            .poll
            .registry()
            .register(peer.stream_mut(), id.token(), Interest::READABLE)
        {
            error!(peer = %id, error = %e, "Couldn't watch peer, dropping it");
            self.registry.remove_by_id(id);
            return None;
        }

        self.stats.peers_admitted += 1;
        debug!(peer = %id, peers = self.registry.len(), "Peer admitted");
        Some(id)
    }

    fn accept_peers(&mut self) {
        loop {
            let Some(listener) = &self.listener else {
                return;
            };
            match listener.accept() {
                Ok((stream, remote)) => {
                    if self.install_peer(stream, Some(remote)).is_some() {
                        info!("Connection from {}", remote.ip());
                        self.device.pulse_dtr();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) => {}
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    /// Dials the server and admits the connection. `Ok(false)` means shutdown.
    fn connect_peer(&mut self) -> BridgeResult<bool> {
        let Some(connector) = &self.connector else {
            return Ok(true);
        };
        match connector.connect(&self.shutdown)? {
            Some(stream) => {
                self.install_peer(stream, None);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes a peer; in client mode a replacement is dialed right away.
    fn disconnect_peer(&mut self, id: PeerId) -> BridgeResult<bool> {
        if let Some(mut peer) = self.registry.remove_by_id(id) {
            if let Err(e) = self.poll.registry().deregister(peer.stream_mut()) {
                debug!(peer = %id, error = %e, "Peer deregistration failed");
            }
            self.stats.peers_closed += 1;
            debug!(peer = %id, remote = ?peer.remote(), peers = self.registry.len(), "Peer removed");
        }
        if self.connector.is_some() {
            return self.connect_peer();
        }
        Ok(true)
    }

    /// Drains the device chunk by chunk, fanning each chunk out as it arrives.
    fn service_device(&mut self) -> BridgeResult<bool> {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match self.device.read(&mut buf) {
                Ok(0) => {
                    info!(device = %self.device.name(), "Device closed");
                    return self.reopen_device();
                }
                Ok(n) => {
                    trace!(bytes = n, "Device");
                    self.stats.bytes_from_device += n as u64;
                    if !self.fan_out(&buf[..n])? {
                        return Ok(false);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    info!(device = %self.device.name(), error = %e, "Device closed");
                    return self.reopen_device();
                }
            }
        }
    }

    fn reopen_device(&mut self) -> BridgeResult<bool> {
        self.deregister_device();
        if !self.device.reopen(self.options.retry.reopen_delay, &self.shutdown)? {
            return Ok(false);
        }
        self.register_device()?;
        Ok(true)
    }

    /// Copies `data` to every peer in registry order.
    ///
    /// Each write stands alone: a slow peer loses what did not fit, a broken peer is
    /// removed, and neither affects delivery to the others.
    fn fan_out(&mut self, data: &[u8]) -> BridgeResult<bool> {
        let mut broken = Vec::new();
        for peer in self.registry.iter_mut() {
            match write_peer(peer.stream_mut(), data) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    warn!(peer = %peer.id(), "Peer not keeping up: {}", e);
                }
                Err(e) => {
                    warn!(peer = %peer.id(), error = %e, "Write to peer failed, closing it");
                    broken.push(peer.id());
                }
            }
        }

        for id in broken {
            if !self.disconnect_peer(id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drains one peer, writing each chunk to the device.
    fn service_peer(&mut self, id: PeerId) -> BridgeResult<bool> {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let Some(peer) = self.registry.peer_mut(id) else {
                return Ok(true);
            };
            match peer.stream_mut().read(&mut buf) {
                Ok(0) => {
                    info!(peer = %id, "Connection closed");
                    return self.disconnect_peer(id);
                }
                Ok(n) => {
                    trace!(peer = %id, bytes = n, "Remote");
                    self.write_device(&buf[..n]);
                    if self.shutdown.is_requested() {
                        return Ok(false);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(peer = %id, error = %e, "Read from peer failed, closing it");
                    return self.disconnect_peer(id);
                }
            }
        }
    }

    fn write_device(&mut self, data: &[u8]) {
        if !self.device.is_open() {
            debug!(bytes = data.len(), "Device not open, dropping peer data");
            return;
        }
        match self.device.write_all(data, &self.shutdown) {
            Ok(written) => {
                self.stats.bytes_to_device += written as u64;
                let dropped = data.len() - written;
                if dropped > 0 {
                    self.stats.bytes_dropped_to_device += dropped as u64;
                    debug!(bytes = dropped, "Shutdown while device was stalled, dropping peer data");
                }
            }
            Err(e) => warn!(device = %self.device.name(), error = %e, "Write to device failed"),
        }
    }

    /// Closes the listener, every peer and the device, and removes the pty link.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(listener.source_mut());
        }
        for mut peer in self.registry.drain() {
            let _ = self.poll.registry().deregister(peer.stream_mut());
        }
        self.deregister_device();
        self.device.release();

        let stats = self.stats();
        info!(?stats, "Bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Writes as much of `data` as the peer accepts without blocking.
fn write_peer(stream: &mut TcpStream, data: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("dropped {} of {} bytes", data.len() - written, data.len()),
                ));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
