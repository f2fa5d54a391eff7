use mio::Token;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// First [`Token`] value handed out to peers; lower values belong to fixed sources.
pub const PEER_TOKEN_BASE: usize = 16;

/// Stable identity of an admitted peer.
///
/// Indices into the registry shift on removal, ids never do, so anything that must
/// survive a removal (readiness snapshots, poll tokens) refers to peers by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub fn token(self) -> Token {
        Token(PEER_TOKEN_BASE + self.0 as usize)
    }

    pub fn from_token(token: Token) -> Option<Self> {
        token
            .0
            .checked_sub(PEER_TOKEN_BASE)
            .map(|offset| PeerId(offset as u64))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// One connected stream endpoint.
#[derive(Debug)]
pub struct Peer<S> {
    id: PeerId,
    stream: S,
    remote: Option<SocketAddr>,
}

impl<S> Peer<S> {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Remote address of an accepted peer; `None` for outbound connections.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn into_stream(self) -> S {
        self.stream
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("Maximum number of connections ({max}) reached")]
    Full { max: usize },
}

/// Bounded, insertion-ordered collection of peers.
///
/// Removal compacts the sequence so it stays dense. Dropping a [`Peer`] closes its
/// descriptor, so a rejected admission closes the new stream immediately.
#[derive(Debug)]
pub struct PeerRegistry<S> {
    peers: Vec<Peer<S>>,
    max_connections: usize,
    next_id: u64,
}

impl<S> PeerRegistry<S> {
    pub fn new(max_connections: usize) -> Self {
        Self {
            peers: Vec::with_capacity(max_connections),
            max_connections,
            next_id: 0,
        }
    }

    /// Appends `stream` unless the registry is at capacity, in which case the stream
    /// is dropped (closed) and the registry is left unchanged.
    pub fn admit(&mut self, stream: S, remote: Option<SocketAddr>) -> Result<PeerId, AdmitError> {
        if self.is_full() {
            drop(stream);
            return Err(AdmitError::Full {
                max: self.max_connections,
            });
        }

        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.peers.push(Peer { id, stream, remote });
        Ok(id)
    }

    /// Removes the peer at `index`, shifting every later peer left by one.
    ///
    /// The caller owns the returned peer; dropping it closes the descriptor.
    pub fn remove(&mut self, index: usize) -> Peer<S> {
        self.peers.remove(index)
    }

    pub fn remove_by_id(&mut self, id: PeerId) -> Option<Peer<S>> {
        self.position(id).map(|index| self.peers.remove(index))
    }

    /// Current index of `id`, if it is still registered.
    pub fn position(&self, id: PeerId) -> Option<usize> {
        self.peers.iter().position(|peer| peer.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&Peer<S>> {
        self.peers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Peer<S>> {
        self.peers.get_mut(index)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer<S>> {
        self.peers.iter_mut().find(|peer| peer.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer<S>> {
        self.peers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer<S>> {
        self.peers.iter_mut()
    }

    /// Ids in registry order.
    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|peer| peer.id).collect()
    }

    /// Empties the registry, yielding peers in registry order.
    pub fn drain(&mut self) -> impl Iterator<Item = Peer<S>> + '_ {
        self.peers.drain(..)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_connections
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
