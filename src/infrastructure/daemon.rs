//! Detaching from the controlling terminal.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use tracing::{debug, info};

/// Starts a new session and points stdin, stdout and stderr at `/dev/null`.
///
/// There is no fork: the process keeps its pid, which suits supervisors that track it.
pub fn detach() -> io::Result<()> {
    // SAFETY: setsid takes no arguments and only changes process state.
    if unsafe { libc::setsid() } == -1 {
        debug!(error = %io::Error::last_os_error(), "setsid failed, already a session leader");
    }

    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: `null` stays open across the call; the targets are the standard fds.
        if unsafe { libc::dup2(null.as_raw_fd(), target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    info!("Detached from terminal");
    Ok(())
}
