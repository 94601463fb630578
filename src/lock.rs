//! PID-file based single-instance lock with stale-PID detection.

use nix::sys::signal::kill;
use nix::unistd::{getpid, Pid};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),
    #[error("cannot open pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct LockFile {
    path: PathBuf,
    held: bool,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LockFile {
            path: path.into(),
            held: false,
        }
    }

    /// Returns `Ok(())` if the lock is now held by this process, or
    /// `Err(LockError::AlreadyRunning)` if a live holder exists.
    /// Idempotent: acquiring twice in the same process succeeds silently.
    pub fn acquire(&mut self) -> Result<(), LockError> {
        if self.held {
            return Ok(());
        }

        if let Some(existing_pid) = self.read_pid() {
            if pid_is_alive(existing_pid) {
                return Err(LockError::AlreadyRunning(existing_pid));
            }
            warn!(pid = existing_pid, "reclaiming lock file with stale pid");
        }

        self.write_pid()?;
        self.held = true;
        Ok(())
    }

    /// Deletes the lock file. A no-op (returns `false`) if this process
    /// does not hold the lock.
    pub fn release(&mut self) -> bool {
        if !self.held {
            return false;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %err, "failed to remove lock file");
            }
        }
        self.held = false;
        true
    }

    fn read_pid(&self) -> Option<i32> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.trim().parse::<i32>().ok()
    }

    fn write_pid(&self) -> Result<(), LockError> {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let mut file = fs::File::create(&self.path).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;
        let pid = getpid().as_raw();
        write!(file, "{pid}").map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(pid, path = %self.path.display(), "wrote pid file");
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Signal-0 liveness probe. Any process
/// we're not allowed to signal (EPERM) still counts as alive — only
/// ESRCH ("no such process") means the PID is free to reclaim.
fn pid_is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
