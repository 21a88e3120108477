//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep debugger-assigned thread numbers apart from
//! kernel process IDs in function signatures.

use std::fmt;

/// Process ID of the traced program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Thread identifier as numbered by the debugging backend
///
/// This is NOT the kernel TID: GDB numbers threads 1, 2, ... per inferior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread#{}", self.0)
    }
}
