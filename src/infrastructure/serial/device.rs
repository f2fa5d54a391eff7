use crate::core::shutdown::{ShutdownFlag, SLEEP_SLICE};
use crate::domain::error::{BridgeError, BridgeResult};
use crate::domain::settings::SerialSettings;
use crate::infrastructure::serial::pty::PtyLink;
use crate::infrastructure::serial::settings::apply_settings;
use crate::infrastructure::serial::tty::pulse_dtr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Produces a fresh descriptor for the character device.
///
/// The returned file must be in non-blocking mode.
pub trait DeviceOpener: Send {
    fn open(&mut self) -> io::Result<File>;

    /// Human readable name used in log lines and errors.
    fn describe(&self) -> String;
}

/// Work done once after every successful open, and undone at shutdown.
pub trait DeviceSetup: Send {
    fn prepare(&mut self, device: &File) -> BridgeResult<()>;

    fn release(&mut self) {}
}

/// Opens a device node by path, without becoming its controlling terminal.
#[derive(Debug, Clone)]
pub struct PathOpener {
    path: PathBuf,
    write_only: bool,
}

impl PathOpener {
    pub fn new(path: impl Into<PathBuf>, write_only: bool) -> Self {
        Self {
            path: path.into(),
            write_only,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceOpener for PathOpener {
    fn open(&mut self) -> io::Result<File> {
        OpenOptions::new()
            .read(!self.write_only)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Applies serial settings and publishes the pty link, in that order.
#[derive(Debug, Default)]
pub struct TtySetup {
    settings: Option<SerialSettings>,
    link: Option<PtyLink>,
}

impl TtySetup {
    pub fn new(settings: Option<SerialSettings>, link: Option<PtyLink>) -> Self {
        Self { settings, link }
    }
}

impl DeviceSetup for TtySetup {
    fn prepare(&mut self, device: &File) -> BridgeResult<()> {
        if let Some(settings) = &self.settings {
            if let Err(e) = apply_settings(device, settings) {
                error!(error = %e, "Couldn't apply serial settings");
            }
        }
        if let Some(link) = &mut self.link {
            link.publish(device)?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(link) = &mut self.link {
            link.remove();
        }
    }
}

/// Open failures that mean "the device is not there right now".
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EIO | libc::ENOENT | libc::ENXIO | libc::ENODEV | libc::EBUSY | libc::EAGAIN)
    )
}

/// Owner of the single character-device descriptor.
pub struct DeviceChannel {
    opener: Box<dyn DeviceOpener>,
    setup: Box<dyn DeviceSetup>,
    handle: Option<File>,
    opens: u64,
}

impl DeviceChannel {
    /// Opens the device for the first time. Any failure here is fatal.
    pub fn open(mut opener: Box<dyn DeviceOpener>, setup: Box<dyn DeviceSetup>) -> BridgeResult<Self> {
        let file = opener.open().map_err(|source| BridgeError::DeviceOpen {
            path: opener.describe(),
            source,
        })?;
        info!(device = %opener.describe(), "Device opened");

        let mut channel = Self {
            opener,
            setup,
            handle: None,
            opens: 0,
        };
        channel.install(file)?;
        Ok(channel)
    }

    fn install(&mut self, file: File) -> BridgeResult<()> {
        self.setup.prepare(&file)?;
        self.handle = Some(file);
        self.opens += 1;
        Ok(())
    }

    pub fn name(&self) -> String {
        self.opener.describe()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.handle.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Number of successful opens, the initial one included.
    pub fn opens(&self) -> u64 {
        self.opens
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.handle {
            Some(file) => file.read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Writes all of `data`, waiting for the device to drain when it would block.
    ///
    /// Returns the number of bytes written. It falls short of `data.len()` only when
    /// shutdown is requested while the device is not accepting data.
    pub fn write_all(&mut self, data: &[u8], shutdown: &ShutdownFlag) -> io::Result<usize> {
        let file = self.handle.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        let mut written = 0;
        while written < data.len() {
            match file.write(&data[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !wait_writable(file.as_raw_fd(), shutdown)? {
                        return Ok(written);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Resets hardware attached to the device by toggling DTR.
    pub fn pulse_dtr(&self) {
        let Some(file) = &self.handle else {
            return;
        };
        match pulse_dtr(file) {
            Ok(()) => info!("DTR pulse"),
            Err(e) => debug!(error = %e, "DTR pulse not supported by device"),
        }
    }

    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!(device = %self.opener.describe(), "Device closed");
        }
    }

    /// Closes the device and blocks until it can be opened again.
    ///
    /// Transient failures are retried every `delay` without limit. Returns `Ok(false)`
    /// when shutdown was requested before the device came back.
    pub fn reopen(&mut self, delay: Duration, shutdown: &ShutdownFlag) -> BridgeResult<bool> {
        self.close();
        loop {
            if shutdown.is_requested() {
                return Ok(false);
            }
            match self.opener.open() {
                Ok(file) => {
                    info!(device = %self.opener.describe(), "Device re-opened");
                    self.install(file)?;
                    return Ok(true);
                }
                Err(e) if is_transient(&e) => {
                    warn!(device = %self.opener.describe(), error = %e, "Open failed, retrying");
                    if !shutdown.sleep(delay) {
                        return Ok(false);
                    }
                }
                Err(source) => {
                    return Err(BridgeError::DeviceReopen {
                        path: self.opener.describe(),
                        source,
                    })
                }
            }
        }
    }

    /// Closes the device and undoes the setup (pty link removal).
    pub fn release(&mut self) {
        self.close();
        self.setup.release();
    }
}

impl std::fmt::Debug for DeviceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceChannel")
            .field("device", &self.opener.describe())
            .field("fd", &self.raw_fd())
            .field("opens", &self.opens)
            .finish()
    }
}

/// Waits until `fd` accepts data. `Ok(false)` means shutdown came first.
fn wait_writable(fd: RawFd, shutdown: &ShutdownFlag) -> io::Result<bool> {
    let slice = SLEEP_SLICE.as_millis() as libc::c_int;
    loop {
        if shutdown.is_requested() {
            return Ok(false);
        }
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        // SAFETY: `pollfd` is a single valid entry that outlives the call.
        let ready = unsafe { libc::poll(&mut pollfd, 1, slice) };
        if ready > 0 {
            return Ok(true);
        }
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}
