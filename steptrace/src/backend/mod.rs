//! # Debugging Backend Contract
//!
//! The engine never talks to a debugger directly. Everything it needs from the
//! native debugging backend goes through [`DebugBackend`]:
//!
//! ```text
//!   create_target ─▶ launch ─▶ ┌──────────────────────────────┐
//!                              │ process_state                │
//!                              │ selected_thread / _frame     │
//!                              │ stack_depth                  │ ◀─ repeated
//!                              │ frame_variables / describe   │    per stop
//!                              │ address_of / children        │
//!                              │ step                         │
//!                              └──────────────────────────────┘
//!                                         │
//!                                         ▼
//!                                        kill
//! ```
//!
//! Implementations:
//! - [`gdb::GdbBackend`]: drives GDB through its machine interface
//! - [`crate::testing::ReplayBackend`]: replays canned frame sequences
//!
//! Variables are opaque handles ([`DebugBackend::Variable`]) so an adapter can
//! fetch children lazily; the snapshot extractor decides how many it needs.

pub mod gdb;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use steptrace_common::VariableScope;

use crate::domain::{BackendError, Pid, ThreadId};

/// Source file of a frame's line entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    /// Absolute path when the backend can resolve one, else as recorded in debug info
    pub path: PathBuf,
    /// File name as displayed (basename)
    pub name: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());
        Self { path, name }
    }
}

/// Where a stopped frame is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocation {
    pub function: String,
    pub file: Option<SourceFile>,
    pub line: Option<u32>,
}

impl FrameLocation {
    /// File and line, present only when the frame has a resolvable line entry.
    #[must_use]
    pub fn line_entry(&self) -> Option<(&SourceFile, u32)> {
        match (&self.file, self.line) {
            (Some(file), Some(line)) if line > 0 => Some((file, line)),
            _ => None,
        }
    }
}

/// Run state of the traced process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    /// Halted and ready for inspection
    Stopped,
    /// Resumed and executing
    Running,
    /// Exited, killed, or never started successfully
    Exited,
    /// No process launched yet
    #[default]
    Unknown,
}

impl ProcessState {
    #[must_use]
    pub fn is_stopped(self) -> bool {
        self == ProcessState::Stopped
    }
}

/// Type classification reported by the backend for a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeClass {
    #[default]
    Scalar,
    /// struct / class / union
    Aggregate,
    Array,
}

/// Everything the backend knows about one variable, without its children.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub type_name: String,
    /// Textual value as formatted by the backend
    pub value: Option<String>,
    pub type_class: TypeClass,
    pub child_count: usize,
    pub scope: VariableScope,
}

/// How far one step advances the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepGranularity {
    /// Next source line, stepping over calls
    #[default]
    Over,
    /// Next source line, entering callees that have line information
    Into,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Halt at the very first instruction instead of running to a named entry
    pub stop_at_entry: bool,
}

/// Out-of-band handle able to break a blocked [`DebugBackend::step`].
///
/// Called from the timeout alarm thread.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Capability surface of a native debugging backend.
///
/// All calls are synchronous. [`DebugBackend::step`] is the only call that
/// may block for long; [`DebugBackend::interrupter`] exists to abort it.
pub trait DebugBackend {
    /// Opaque handle to a variable in the currently selected frame.
    type Variable;

    /// Load the executable.
    ///
    /// # Errors
    /// [`BackendError::TargetCreateFailed`] if the binary is missing or unloadable
    fn create_target(&mut self, executable: &std::path::Path) -> Result<(), BackendError>;

    /// Start the process and return its PID once it is halted.
    ///
    /// # Errors
    /// [`BackendError::LaunchFailed`] with a descriptive message
    fn launch(&mut self, options: &LaunchOptions) -> Result<Pid, BackendError>;

    fn process_state(&mut self) -> ProcessState;

    fn process_id(&self) -> Option<Pid>;

    /// Thread of interest, `None` when there is no valid thread.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn selected_thread(&mut self) -> Result<Option<ThreadId>, BackendError>;

    /// Top-of-stack frame of `thread`, `None` when there is no valid frame.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn selected_frame(&mut self, thread: ThreadId) -> Result<Option<FrameLocation>, BackendError>;

    /// Number of frames on `thread`'s stack.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn stack_depth(&mut self, thread: ThreadId) -> Result<usize, BackendError>;

    /// In-scope arguments and locals of the top frame, in enumeration order.
    /// Statics are excluded.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn frame_variables(&mut self, thread: ThreadId) -> Result<Vec<Self::Variable>, BackendError>;

    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn describe(&mut self, var: &Self::Variable) -> Result<VariableInfo, BackendError>;

    /// Load address, `None` when the variable has none (register, optimized out).
    ///
    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn address_of(&mut self, var: &Self::Variable) -> Result<Option<u64>, BackendError>;

    /// Child `index` of an aggregate or array.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn child_at(
        &mut self,
        var: &Self::Variable,
        index: usize,
    ) -> Result<Option<Self::Variable>, BackendError>;

    /// First `limit` children. Adapters that can fetch a range in one call
    /// override this.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be queried
    fn children(
        &mut self,
        var: &Self::Variable,
        limit: usize,
    ) -> Result<Vec<Self::Variable>, BackendError> {
        let count = self.describe(var)?.child_count.min(limit);
        let mut children = Vec::with_capacity(count);
        for index in 0..count {
            if let Some(child) = self.child_at(var, index)? {
                children.push(child);
            }
        }
        Ok(children)
    }

    /// Advance `thread` by one source-level step. Blocks until the target
    /// halts again, exits, or is interrupted.
    ///
    /// # Errors
    /// Returns an error if the step could not be performed
    fn step(&mut self, thread: ThreadId, granularity: StepGranularity) -> Result<(), BackendError>;

    /// Handle for the timeout alarm, if this backend supports preemption.
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>>;

    /// Forcibly terminate the live process, if any. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the process could not be terminated
    fn kill(&mut self) -> Result<(), BackendError>;
}
