//! Testing utilities for steptrace.
//!
//! Provides a scripted [`DebugBackend`](crate::backend::DebugBackend) that
//! replays canned stops, so the session driver can be exercised without a
//! debugger or a compiled target. The `tracer` binary exposes it through
//! `--replay <script.json>`.
//!
//! # Components
//!
//! - [`replay`]: script model and the replaying backend

pub mod replay;

pub use replay::{ReplayBackend, ReplayScript, ReplayStop, ReplayVariable, REPLAY_PID};
