//! Structured error types for steptrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a debugging backend.
///
/// Only [`BackendError::TargetCreateFailed`] and [`BackendError::LaunchFailed`]
/// are fatal for a session; the driver absorbs everything else as a normal
/// end of run.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to create target for {path}: {reason}")]
    TargetCreateFailed { path: PathBuf, reason: String },

    #[error("Failed to launch process: {0}")]
    LaunchFailed(String),

    #[error("No live process")]
    NoProcess,

    #[error("Debugger command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Debugger exited unexpectedly")]
    DebuggerExited,

    #[error("Malformed debugger output: {0}")]
    Protocol(String),

    #[error("Failed to start debugger {debugger}: {error}")]
    SpawnFailed { debugger: String, error: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors that abort a session before any stepping occurs.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to read semantic info {path}: {error}")]
    SemanticInfoUnreadable { path: PathBuf, error: std::io::Error },

    #[error("Malformed semantic info {path}: {error}")]
    SemanticInfoMalformed { path: PathBuf, error: serde_json::Error },

    #[error("Failed to read replay script {path}: {error}")]
    ReplayScriptUnreadable { path: PathBuf, error: std::io::Error },

    #[error("Malformed replay script {path}: {error}")]
    ReplayScriptMalformed { path: PathBuf, error: serde_json::Error },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write trace document: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
