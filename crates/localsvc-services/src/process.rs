//! OS process table lookups.

use crate::error::{Result, ServiceError};

/// Answers whether a pid currently names a live process.
pub trait ProcessTable: Send + Sync {
    fn exists(&self, pid: u32) -> Result<bool>;
}

/// [`ProcessTable`] backed by `kill(pid, 0)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessTable;

#[cfg(unix)]
impl ProcessTable for OsProcessTable {
    fn exists(&self, pid: u32) -> Result<bool> {
        // pid 0 would address our own process group.
        let pid = match libc::pid_t::try_from(pid) {
            Ok(0) | Err(_) => return Ok(false),
            Ok(pid) => pid,
        };

        // Safety: signal 0 performs permission and existence checks only.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return Ok(true);
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            // Exists, but belongs to someone else.
            Some(libc::EPERM) => Ok(true),
            _ => Err(ServiceError::ProcessLookup(format!("pid {pid}: {err}"))),
        }
    }
}

#[cfg(not(unix))]
impl ProcessTable for OsProcessTable {
    fn exists(&self, pid: u32) -> Result<bool> {
        Err(ServiceError::ProcessLookup(format!(
            "pid {pid}: process lookup is not supported on this platform"
        )))
    }
}
