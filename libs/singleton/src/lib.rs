//! # RSP Singleton - PID-File Process Guard
//!
//! ## Purpose
//! Mutual exclusion across process restarts via a plain-text PID file.
//! A second bridge instance on the same pid file fails fast instead of
//! fighting the first one for the host connection and the relay port.
//!
//! ## Crash Recovery
//! All bridge state is in-memory and lost on crash by design, so the only
//! artifact a crash leaves behind is a stale pid file. `start()` probes the
//! recorded pid with signal 0: a dead pid means the previous run crashed,
//! which is logged as a warning and the file is taken over. A recorded pid
//! equal to the *current* pid cannot happen in normal operation and is
//! treated as file corruption / pid reuse - the caller must abort with a
//! dedicated exit status.
//!
//! ## Permissions
//! The file is chmod'ed world read/write after creation so a later run under
//! a different user (e.g. first run as root, next as an unprivileged user)
//! can still rewrite or remove it. A failed chmod is logged, not fatal.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, SingletonError>;

/// Errors raised by [`SingletonGuard::start`]
///
/// Binaries map these onto distinct process exit codes; only `Io` is
/// plausibly transient.
#[derive(Debug, Error)]
pub enum SingletonError {
    /// Another live process holds the pid file
    #[error("Another instance is already running with pid {pid}")]
    AlreadyRunning {
        /// The pid recorded in the file
        pid: i32,
    },

    /// The file records the current process id - pid reuse or corruption
    #[error("Pid file {path:?} already records the current pid {pid}; delete it manually")]
    PidFileCorrupt {
        /// Path of the offending file
        path: PathBuf,
        /// The anomalous pid
        pid: i32,
    },

    /// Filesystem failure while reading or writing the pid file
    #[error("Pid file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// PID-file based single-instance guard
#[derive(Debug, Clone)]
pub struct SingletonGuard {
    path: PathBuf,
}

impl SingletonGuard {
    /// Guard backed by the pid file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the pid file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim the pid file or fail
    ///
    /// Decision table, in order:
    /// - no file → create it with the current pid
    /// - unparseable content → treat as stale, overwrite
    /// - recorded pid == current pid → [`SingletonError::PidFileCorrupt`]
    /// - recorded pid alive → [`SingletonError::AlreadyRunning`], file untouched
    /// - recorded pid dead → prior crash; warn and overwrite
    pub fn start(&self) -> Result<()> {
        let current = std::process::id() as i32;

        if !self.path.exists() {
            self.write_pid_file(current)?;
            info!(path = %self.path.display(), pid = current, "pid file created");
            return Ok(());
        }

        let content = fs::read_to_string(&self.path)?;
        let recorded: i32 = match content.trim().parse() {
            Ok(pid) => pid,
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    "pid file holds no parseable pid, taking over"
                );
                self.write_pid_file(current)?;
                return Ok(());
            }
        };

        if recorded == current {
            error!(
                path = %self.path.display(),
                pid = current,
                "pid file already records the current pid"
            );
            return Err(SingletonError::PidFileCorrupt {
                path: self.path.clone(),
                pid: current,
            });
        }

        if process_alive(recorded) {
            error!(pid = recorded, "found running instance, refusing to start");
            return Err(SingletonError::AlreadyRunning { pid: recorded });
        }

        warn!(
            stale_pid = recorded,
            "previous instance must have crashed, taking over pid file"
        );
        self.write_pid_file(current)?;
        Ok(())
    }

    /// Remove the pid file unconditionally
    ///
    /// Removal failure is logged rather than propagated: shutdown must not
    /// fail over a leftover file the next `start()` will classify as stale.
    pub fn stop(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "pid file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove pid file"),
        }
    }

    fn write_pid_file(&self, pid: i32) -> Result<()> {
        fs::write(&self.path, pid.to_string())?;
        // World read/write so a differently-privileged future run can manage it
        if let Err(e) = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o666)) {
            error!(path = %self.path.display(), error = %e, "could not chmod pid file");
        }
        Ok(())
    }
}

/// Probe `pid` with signal 0
///
/// `ESRCH` is the only definitive "no such process"; `EPERM` means the pid
/// exists under another user, which still counts as alive.
fn process_alive(pid: i32) -> bool {
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn guard_in(dir: &TempDir) -> SingletonGuard {
        SingletonGuard::new(dir.path().join("rsp-bridge.pid"))
    }

    #[test]
    fn test_fresh_start_records_current_pid() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        guard.start().unwrap();
        let content = fs::read_to_string(guard.path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[test]
    fn test_current_pid_in_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);
        fs::write(guard.path(), std::process::id().to_string()).unwrap();

        let err = guard.start().unwrap_err();
        assert!(matches!(err, SingletonError::PidFileCorrupt { .. }));
        // The file must be left as-is for manual inspection
        assert_eq!(
            fs::read_to_string(guard.path()).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_live_foreign_pid_refuses_start() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);
        // pid 1 is always alive (and not us)
        fs::write(guard.path(), "1").unwrap();

        let err = guard.start().unwrap_err();
        assert!(matches!(err, SingletonError::AlreadyRunning { pid: 1 }));
        assert_eq!(fs::read_to_string(guard.path()).unwrap(), "1");
    }

    #[test]
    fn test_stale_pid_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);
        // Far above any real pid_max, guaranteed ESRCH
        fs::write(guard.path(), "99999999").unwrap();

        guard.start().unwrap();
        assert_eq!(
            fs::read_to_string(guard.path()).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_garbage_content_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);
        fs::write(guard.path(), "not-a-pid\n").unwrap();

        guard.start().unwrap();
        assert_eq!(
            fs::read_to_string(guard.path()).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_stop_removes_file_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        guard.start().unwrap();
        guard.stop();
        assert!(!guard.path().exists());
        // Second stop must not panic or error
        guard.stop();
    }
}
