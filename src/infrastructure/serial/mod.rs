// Serial module - character device access, settings and pty publication
pub mod device;
pub mod pty;
pub mod settings;
pub mod tty;

pub use device::{DeviceChannel, DeviceOpener, DeviceSetup, PathOpener, TtySetup};
pub use pty::PtyLink;
