//! Pre-flight checks for tracer
//!
//! Validates the executable and the debugger before a session starts.
//! Provides clear, actionable error messages when requirements aren't met.

use anyhow::{bail, Context, Result};
use log::warn;
use object::{Object, ObjectSection};
use std::path::Path;
use std::process::{Command, Stdio};

/// Run all pre-flight checks before launching the debugger.
///
/// `debugger` is `None` when no live debugger will be used (replay mode).
/// Missing debug info is reported even under `--quiet`, since it explains
/// an empty trace.
pub fn run_preflight_checks(target_path: &Path, debugger: Option<&Path>) -> Result<()> {
    check_binary_exists(target_path)?;
    if let Some(debugger) = debugger {
        check_debugger(debugger)?;
    }
    let message = match check_debug_symbols(target_path)? {
        DebugInfo::Missing => "no DWARF debug info, no steps will be recorded (compile with -g)",
        DebugInfo::NoLineTable => "no DWARF line table, source lines unavailable",
        DebugInfo::Present | DebugInfo::NotAnObject => return Ok(()),
    };
    warn!("{}: {message}", target_path.display());
    eprintln!("warning: {message}");
    Ok(())
}

/// Debug sections found in the executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebugInfo {
    Present,
    NoLineTable,
    Missing,
    /// Not an object file; the debugger reports it
    NotAnObject,
}

/// Check if the target binary exists and is readable
fn check_binary_exists(target_path: &Path) -> Result<()> {
    if !target_path.exists() {
        bail!(
            "Binary not found: {}\n\n\
             Make sure the path is correct and the binary exists.",
            target_path.display()
        );
    }
    if !target_path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             The executable path must point to a file, not a directory.",
            target_path.display()
        );
    }
    Ok(())
}

/// Check that the debugger can be started at all
fn check_debugger(debugger: &Path) -> Result<()> {
    let status = Command::new(debugger)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| {
            format!(
                "Cannot run debugger '{}'\n\n\
                 Install gdb or point --gdb at a working binary.",
                debugger.display()
            )
        })?;

    if !status.success() {
        bail!("Debugger '{}' --version exited with {status}", debugger.display());
    }
    Ok(())
}

/// Check if the binary has line information for source-level stepping
fn check_debug_symbols(target_path: &Path) -> Result<DebugInfo> {
    let file_data = std::fs::read(target_path)
        .with_context(|| format!("Failed to read binary: {}", target_path.display()))?;

    let Ok(obj) = object::File::parse(&*file_data) else {
        return Ok(DebugInfo::NotAnObject);
    };

    let has_debug_info = obj.section_by_name(".debug_info").is_some_and(|s| s.size() > 0);
    let has_line_info = obj.section_by_name(".debug_line").is_some_and(|s| s.size() > 0);

    Ok(match (has_debug_info, has_line_info) {
        (false, _) => DebugInfo::Missing,
        (true, false) => DebugInfo::NoLineTable,
        (true, true) => DebugInfo::Present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_not_found() {
        let result = check_binary_exists(Path::new("/nonexistent/path/to/binary"));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Binary not found"));
    }

    #[test]
    fn test_directory_is_not_a_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_binary_exists(dir.path()).unwrap_err().to_string();
        assert!(err.contains("Not a file"));
    }

    #[test]
    fn test_missing_debugger() {
        let err = check_debugger(Path::new("/nonexistent/gdb")).unwrap_err().to_string();
        assert!(err.contains("Cannot run debugger"));
    }

    #[test]
    fn test_non_object_file_is_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"#!/bin/sh\necho hi\n").unwrap();
        assert_eq!(check_debug_symbols(file.path()).unwrap(), DebugInfo::NotAnObject);
        assert!(run_preflight_checks(file.path(), None).is_ok());
    }

    #[test]
    fn test_debug_build_has_line_info() {
        // Test binaries are built with the dev profile, which keeps DWARF
        let exe = std::env::current_exe().unwrap();
        assert_eq!(check_debug_symbols(&exe).unwrap(), DebugInfo::Present);
    }
}
