//! Liveness checks and signal delivery for traced processes.

#![allow(unsafe_code)] // kill() requires unsafe

use anyhow::{bail, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

/// Whether `pid` names a process that is still executing.
///
/// Zombies count as gone: a killed inferior stays in the process table until
/// its debugger reaps it, but it will never run again.
#[must_use]
pub fn is_process_running(pid: Pid) -> bool {
    let stat_path = format!("/proc/{}/stat", pid.0);
    match fs::read_to_string(&stat_path) {
        Ok(stat) => extract_state(&stat).is_ok_and(|state| !matches!(state, 'Z' | 'X' | 'x')),
        // No procfs (or an unreadable entry): fall back to a null signal
        Err(_) if !Path::new("/proc/self").exists() => signal_alive(pid),
        Err(_) => false,
    }
}

/// Deliver `signal` to `pid`.
///
/// # Errors
/// Returns the OS error if the signal could not be sent
pub fn send_signal(pid: Pid, signal: libc::c_int) -> io::Result<()> {
    let raw = i32::try_from(pid.0)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {pid}")))?;

    if unsafe { libc::kill(raw, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn signal_alive(pid: Pid) -> bool {
    match send_signal(pid, 0) {
        Ok(()) => true,
        Err(e) => e.raw_os_error() == Some(libc::EPERM),
    }
}

/// Resolve the executable argument to an absolute path.
///
/// # Errors
/// Returns error if the path does not exist
pub fn resolve_executable(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("Cannot resolve {}", path.display()))
}

/// Extract the state letter from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_state(stat_line: &str) -> Result<char> {
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    let Some(state) = stat_line[close + 1..].split_whitespace().next() else {
        bail!("Invalid stat format");
    };
    state.chars().next().context("Invalid stat format")
}
