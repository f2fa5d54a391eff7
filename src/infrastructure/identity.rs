//! User and group name resolution for the pty link owner.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;
use tracing::{debug, error};

const INITIAL_BUFFER: usize = 1024;
const MAX_BUFFER: usize = 1 << 20;

/// Resolves a user name, or a string of digits taken as a uid.
pub fn resolve_user(name: &str) -> Option<u32> {
    if let Some(id) = numeric_id(name) {
        return Some(id);
    }
    let cname = CString::new(name).ok()?;
    let result = lookup(|buf| {
        // SAFETY: passwd is plain old data and is only read after getpwnam_r fills it.
        let mut entry: libc::passwd = unsafe { mem::zeroed() };
        let mut found: *mut libc::passwd = ptr::null_mut();
        // SAFETY: every pointer is valid for the call and `buf.len()` bounds the scratch space.
        let rc = unsafe { libc::getpwnam_r(cname.as_ptr(), &mut entry, buf.as_mut_ptr(), buf.len(), &mut found) };
        (rc, (!found.is_null()).then_some(entry.pw_uid))
    });
    report("user", name, result)
}

/// Resolves a group name, or a string of digits taken as a gid.
pub fn resolve_group(name: &str) -> Option<u32> {
    if let Some(id) = numeric_id(name) {
        return Some(id);
    }
    let cname = CString::new(name).ok()?;
    let result = lookup(|buf| {
        // SAFETY: group is plain old data and is only read after getgrnam_r fills it.
        let mut entry: libc::group = unsafe { mem::zeroed() };
        let mut found: *mut libc::group = ptr::null_mut();
        // SAFETY: every pointer is valid for the call and `buf.len()` bounds the scratch space.
        let rc = unsafe { libc::getgrnam_r(cname.as_ptr(), &mut entry, buf.as_mut_ptr(), buf.len(), &mut found) };
        (rc, (!found.is_null()).then_some(entry.gr_gid))
    });
    report("group", name, result)
}

fn numeric_id(name: &str) -> Option<u32> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Runs a reentrant `get*nam_r` call, growing the scratch buffer on ERANGE.
fn lookup(mut call: impl FnMut(&mut [libc::c_char]) -> (libc::c_int, Option<u32>)) -> io::Result<Option<u32>> {
    let mut size = INITIAL_BUFFER;
    loop {
        let mut buf = vec![0 as libc::c_char; size];
        match call(&mut buf) {
            (0, id) => return Ok(id),
            (libc::ERANGE, _) if size < MAX_BUFFER => size *= 2,
            (rc, _) => return Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

fn report(kind: &str, name: &str, result: io::Result<Option<u32>>) -> Option<u32> {
    match result {
        Ok(Some(id)) => {
            debug!(kind, name, id, "Resolved owner");
            Some(id)
        }
        Ok(None) => {
            error!(kind, name, "Error finding {} '{}': no such entry", kind, name);
            None
        }
        Err(e) => {
            error!(kind, name, error = %e, "Error finding {} '{}'", kind, name);
            None
        }
    }
}
