use crate::domain::config::LinkConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use std::ffi::CStr;
use std::fs::{self, File, Permissions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{chown, symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Publishes the slave side of a pseudo-terminal under a fixed, well-known path.
#[derive(Debug)]
pub struct PtyLink {
    config: LinkConfig,
    published: Option<PathBuf>,
}

impl PtyLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            published: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Slave path the link currently points at, if it has been published.
    pub fn published(&self) -> Option<&Path> {
        self.published.as_deref()
    }

    /// Unlocks the pty pair behind `master`, hands the slave to the configured owner
    /// and mode, then points the link at it.
    ///
    /// Ownership and permission failures are logged only. Everything else is fatal.
    pub fn publish(&mut self, master: &File) -> BridgeResult<PathBuf> {
        let fd = master.as_raw_fd();
        unlock_pty(fd).map_err(|source| link_error("grantpt/unlockpt failed", source))?;
        let slave = slave_name(fd).map_err(|source| link_error("no slave name", source))?;
        info!(slave = %slave.display(), "Current pty slave");

        if self.config.owner.is_some() || self.config.group.is_some() {
            match chown(&slave, self.config.owner, self.config.group) {
                Ok(()) => info!("Changed owner of pty slave"),
                Err(e) => error!(
                    uid = ?self.config.owner,
                    gid = ?self.config.group,
                    error = %e,
                    "Couldn't chown pty slave"
                ),
            }
        }
        if let Err(e) = fs::set_permissions(&slave, Permissions::from_mode(self.config.mode & 0o7777)) {
            error!(slave = %slave.display(), error = %e, "Couldn't set permissions on pty slave");
        }

        replace_symlink(&slave, &self.config.path)
            .map_err(|source| link_error(&format!("symlink {}", self.config.path.display()), source))?;
        info!(link = %self.config.path.display(), slave = %slave.display(), "Pty link published");

        self.published = Some(slave.clone());
        Ok(slave)
    }

    /// Removes the link if this publisher created it.
    pub fn remove(&mut self) {
        if self.published.take().is_none() {
            return;
        }
        match fs::remove_file(&self.config.path) {
            Ok(()) => info!(link = %self.config.path.display(), "Pty link removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(link = %self.config.path.display(), error = %e, "Couldn't remove pty link"),
        }
    }
}

fn link_error(message: &str, source: io::Error) -> BridgeError {
    BridgeError::PtyLink {
        message: message.to_string(),
        source,
    }
}

fn unlock_pty(fd: RawFd) -> io::Result<()> {
    // SAFETY: both calls only read `fd`; an fd that is not a pty master yields an error.
    if unsafe { libc::grantpt(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::unlockpt(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn slave_name(fd: RawFd) -> io::Result<PathBuf> {
    let mut buf = [0 as libc::c_char; 128];
    // SAFETY: `buf` is writable for `buf.len()` bytes for the whole call.
    let rc = unsafe { libc::ptsname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    // SAFETY: ptsname_r NUL-terminates on success.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(name.to_bytes())))
}

#[cfg(not(target_os = "linux"))]
fn slave_name(fd: RawFd) -> io::Result<PathBuf> {
    // SAFETY: not reentrant, and the returned buffer is copied out before any other
    // ptsname call can happen on this single thread.
    let ptr = unsafe { libc::ptsname(fd) };
    if ptr.is_null() {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: non-null results point at a NUL-terminated static buffer.
    let name = unsafe { CStr::from_ptr(ptr) };
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(name.to_bytes())))
}

/// Points `link` at `target`, replacing whatever is there in a single rename.
fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let file_name = link
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "link path has no file name"))?;
    let mut staging_name = std::ffi::OsString::from(".");
    staging_name.push(file_name);
    staging_name.push(format!(".{}.tmp", std::process::id()));
    let staging = link.with_file_name(staging_name);

    let _ = fs::remove_file(&staging);
    symlink(target, &staging)?;
    if let Err(e) = fs::rename(&staging, link) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn open_master() -> Option<File> {
        OpenOptions::new().read(true).write(true).open("/dev/ptmx").ok()
    }

    fn link_config(dir: &TempDir) -> LinkConfig {
        LinkConfig {
            path: dir.path().join("ttyBRIDGE"),
            owner: None,
            group: None,
            mode: 0o600,
        }
    }

    #[test]
    fn test_replace_symlink_overwrites_existing_entry() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link");
        fs::write(&link, b"stale").unwrap();

        replace_symlink(Path::new("/dev/null"), &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/dev/null"));

        replace_symlink(Path::new("/dev/zero"), &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/dev/zero"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_publish_on_non_pty_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut link = PtyLink::new(link_config(&dir));
        let not_a_pty = File::open("/dev/null").unwrap();

        let err = link.publish(&not_a_pty).unwrap_err();
        assert_eq!(err.exit_code(), 8);
        assert!(link.published().is_none());
        assert!(fs::symlink_metadata(link.path()).is_err());
    }

    #[test]
    fn test_publish_and_remove() {
        let Some(master) = open_master() else {
            eprintln!("skipping: /dev/ptmx unavailable");
            return;
        };
        let dir = TempDir::new().unwrap();
        let mut link = PtyLink::new(link_config(&dir));

        let slave = link.publish(&master).unwrap();
        assert_eq!(fs::read_link(link.path()).unwrap(), slave);
        assert_eq!(link.published(), Some(slave.as_path()));
        let mode = fs::metadata(&slave).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        link.remove();
        assert!(fs::symlink_metadata(link.path()).is_err());
        assert!(link.published().is_none());
    }

    #[test]
    fn test_remove_without_publish_leaves_foreign_file() {
        let dir = TempDir::new().unwrap();
        let config = link_config(&dir);
        fs::write(&config.path, b"not ours").unwrap();

        let mut link = PtyLink::new(config);
        link.remove();
        assert!(link.path().exists());
    }
}
