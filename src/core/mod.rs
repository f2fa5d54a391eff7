pub mod bridge;
pub mod shutdown;
