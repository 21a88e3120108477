//! # Tracing Engine
//!
//! - [`dedup`]: which stops become steps (user code, new signature)
//! - [`classify`]: what kind of step a recorded stop is
//! - [`alarm`]: wall-clock budget watchdog and cancellation token
//! - [`session`]: the driver loop tying backend, filter, and classifier together

pub mod alarm;
pub mod classify;
pub mod dedup;
pub mod session;

pub use alarm::{CancellationToken, TimeoutAlarm};
pub use classify::{classify, StepClass};
pub use dedup::{Deduplicator, FrameSignature};
pub use session::{EndReason, Session, SessionReport, TraceOutcome};
