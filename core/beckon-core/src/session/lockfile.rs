//! Exclusive advisory lock guarding state file writes.
//!
//! A second writer (a CLI invocation racing the daemon) blocks here instead
//! of interleaving with the save. The lock is a sidecar file because the
//! atomic rename in the save path would otherwise replace the locked inode.

use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{BeckonError, Result};
use crate::paths;

pub struct StoreLock {
    file: std::fs::File,
    path: PathBuf,
}

impl StoreLock {
    /// Blocks until the exclusive lock is granted.
    pub fn acquire(state_path: &Path) -> Result<StoreLock> {
        let lock_path = paths::lock_path_for(state_path);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| BeckonError::LockFailed {
                path: lock_path.clone(),
                source,
            })?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(BeckonError::LockFailed {
                path: lock_path,
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(StoreLock {
            file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Closing the fd releases the lock anyway; the explicit unlock keeps
        // the window tight if the guard outlives the save call.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
