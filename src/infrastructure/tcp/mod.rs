// TCP module - accepting and dialing peers
pub mod connector;
pub mod listener;

pub use connector::Connector;
pub use listener::Listener;
