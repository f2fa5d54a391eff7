use crate::domain::settings::SerialSettings;
use crate::infrastructure::serial::tty::with_tty_port;
use serialport::SerialPort;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use tracing::{debug, warn};

/// Programs `settings` into the device behind `device`.
///
/// Termios flags (raw, clocal, hupcl) go first because raw mode resets the character
/// size and parity; the serialport parameters are applied on top of them.
pub fn apply_settings(device: &File, settings: &SerialSettings) -> io::Result<()> {
    for token in &settings.unrecognized {
        warn!(token = %token, "Ignoring unsupported serial setting");
    }

    if settings.has_line_flags() {
        apply_line_flags(device.as_raw_fd(), settings)?;
    }

    with_tty_port(device, |port| {
        if let Some(baud) = settings.baud_rate {
            port.set_baud_rate(baud)?;
        }
        if let Some(bits) = settings.data_bits {
            port.set_data_bits(bits)?;
        }
        if let Some(parity) = settings.parity() {
            port.set_parity(parity)?;
        }
        if let Some(stop) = settings.stop_bits {
            port.set_stop_bits(stop)?;
        }
        if let Some(flow) = settings.flow_control() {
            port.set_flow_control(flow)?;
        }
        Ok(())
    })
    .map_err(io::Error::from)?;

    debug!(settings = %settings, "Serial settings applied");
    Ok(())
}

fn apply_line_flags(fd: RawFd, settings: &SerialSettings) -> io::Result<()> {
    // SAFETY: termios is plain old data and is fully written by tcgetattr.
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `termios` is a live, writable struct for the call.
    if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
        return Err(io::Error::last_os_error());
    }

    match settings.raw {
        // SAFETY: cfmakeraw only edits the flag fields of `termios`.
        Some(true) => unsafe { libc::cfmakeraw(&mut termios) },
        Some(false) => {
            termios.c_iflag |= libc::BRKINT | libc::ICRNL;
            termios.c_oflag |= libc::OPOST | libc::ONLCR;
            termios.c_lflag |= libc::ISIG | libc::ICANON | libc::IEXTEN | libc::ECHO | libc::ECHOE;
        }
        None => {}
    }
    set_flag(&mut termios.c_cflag, libc::CLOCAL, settings.clocal);
    set_flag(&mut termios.c_cflag, libc::HUPCL, settings.hupcl);

    // SAFETY: `termios` came from tcgetattr and outlives the call.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_flag(flags: &mut libc::tcflag_t, flag: libc::tcflag_t, value: Option<bool>) {
    match value {
        Some(true) => *flags |= flag,
        Some(false) => *flags &= !flag,
        None => {}
    }
}
