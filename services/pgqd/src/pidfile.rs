//! Pidfile handling (§4.7, §6): written at start, removed at exit, read by
//! the `-s`/`-k`/`-r` one-shot signal switches to find the running daemon.

use std::path::Path;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::FatalError;

pub fn write(path: &Path) -> Result<(), FatalError> {
    std::fs::write(path, format!("{}\n", std::process::id())).map_err(|source| {
        FatalError::Pidfile {
            path: path.to_path_buf(),
            source,
        }
    })
}

pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove pidfile");
        }
    }
}

fn read_pid(path: &Path) -> Result<Pid, FatalError> {
    let contents = std::fs::read_to_string(path).map_err(|source| FatalError::Pidfile {
        path: path.to_path_buf(),
        source,
    })?;
    let pid: i32 = contents
        .trim()
        .parse()
        .map_err(|_| FatalError::NoSuchProcess(path.to_path_buf()))?;
    Ok(Pid::from_raw(pid))
}

/// Sends the corresponding signal to the daemon named in `path`'s pidfile
/// (§4.7 CLI one-shots).
pub fn send_signal(path: &Path, sig: Signal) -> Result<(), FatalError> {
    let pid = read_pid(path)?;
    signal::kill(pid, sig)?;
    Ok(())
}

pub fn sigint(path: &Path) -> Result<(), FatalError> {
    send_signal(path, Signal::SIGINT)
}

pub fn sigterm(path: &Path) -> Result<(), FatalError> {
    send_signal(path, Signal::SIGTERM)
}

pub fn sighup(path: &Path) -> Result<(), FatalError> {
    send_signal(path, Signal::SIGHUP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgqd.pid");
        write(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        remove(&path);
        assert!(!path.exists());
    }

    #[test]
    fn remove_of_missing_pidfile_does_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.pid");
        remove(&path);
    }

    #[test]
    fn read_pid_rejects_non_numeric_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgqd.pid");
        std::fs::write(&path, "not-a-pid\n").unwrap();
        let err = read_pid(&path).unwrap_err();
        assert!(matches!(err, FatalError::NoSuchProcess(_)));
    }

    #[test]
    fn read_pid_of_missing_file_is_a_pidfile_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.pid");
        let err = read_pid(&path).unwrap_err();
        assert!(matches!(err, FatalError::Pidfile { .. }));
    }

    #[test]
    fn sigterm_to_a_live_process_succeeds() {
        // Signal 0 semantics aren't exercised here; instead send SIGTERM's
        // harmless cousin against our own process's pid isn't safe in a
        // test runner, so this checks only that a plausible, currently-
        // running pid parses and dispatches without error via the
        // underlying `nix::sys::signal::kill` — using our own pid with
        // `Signal::SIGCONT`, which is a no-op for a running process that
        // isn't stopped.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("self.pid");
        write(&path).unwrap();
        send_signal(&path, Signal::SIGCONT).unwrap();
    }
}
