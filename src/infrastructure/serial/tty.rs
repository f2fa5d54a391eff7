use serialport::{SerialPort, TTYPort};
use std::fs::File;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::time::Duration;
use tracing::debug;

/// Low time of the DTR reset pulse.
pub const DTR_PULSE: Duration = Duration::from_micros(300);

/// Runs `f` against a [`TTYPort`] view of `device`.
///
/// The port wraps a duplicate of the descriptor so dropping it never closes the
/// device itself. [`TTYPort::from_raw_fd`] takes the line into exclusive mode; that is
/// undone before the duplicate is released so later opens of the tty keep working.
pub fn with_tty_port<T>(
    device: &File,
    f: impl FnOnce(&mut TTYPort) -> serialport::Result<T>,
) -> serialport::Result<T> {
    let duplicate = device.try_clone()?;
    // SAFETY: the descriptor comes from `into_raw_fd` and is owned by nothing else.
    let mut port = unsafe { TTYPort::from_raw_fd(duplicate.into_raw_fd()) };
    let result = f(&mut port);
    if let Err(e) = port.set_exclusive(false) {
        debug!(error = %e, "Could not release exclusive mode");
    }
    result
}

/// Drops and raises DTR to reset attached hardware at the start of a session.
pub fn pulse_dtr(device: &File) -> serialport::Result<()> {
    with_tty_port(device, |port| {
        port.write_data_terminal_ready(false)?;
        std::thread::sleep(DTR_PULSE);
        port.write_data_terminal_ready(true)
    })
}
