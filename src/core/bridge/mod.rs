// Bridge module - device/peer fan-out over one event loop
pub mod event_loop;
pub mod registry;

pub use event_loop::{Bridge, BridgeOptions, BridgeStats, PeerSource};
pub use registry::{AdmitError, Peer, PeerId, PeerRegistry};
