//! Session driver
//!
//! Owns one tracing run from target creation to the closing step:
//!
//! ```text
//!   create target ──▶ launch ──▶ ┌─────────────── loop ───────────────┐
//!   (fatal)           (fatal)    │ a. budget exhausted?     → Timeout │
//!                                │ b. process not stopped?  → done    │
//!                                │ c. no thread / frame?    → done    │
//!                                │ d. recordable? snapshot, classify, │
//!                                │    append : count stuck stop       │
//!                                │ e. stuck too long?       → Stuck   │
//!                                │ f. step (failure         → done)   │
//!                                │ g. step limit reached?   → Limit   │
//!                                └────────────────────────────────────┘
//!                                              │
//!                      kill process, disarm alarm, append terminal step
//! ```
//!
//! Only target creation and launch failures are errors. Every other way a
//! run can end produces a well-formed trace closed by exactly one terminal
//! step (`program_end` or `timeout`), and the target process is killed on
//! every path out of the loop, including unwinding.

use log::{debug, info, warn};
use std::path::Path;
use std::time::{Duration, Instant};

use steptrace_common::{Locals, Step, StepDetail, StepKind, StepState, TraceDocument, VariableBinding};

use super::alarm::{CancellationToken, TimeoutAlarm};
use super::classify::classify;
use super::dedup::Deduplicator;
use crate::backend::{DebugBackend, FrameLocation, LaunchOptions};
use crate::classification::UserCodeFilter;
use crate::config::TracerConfig;
use crate::domain::{BackendError, Pid, ThreadId};
use crate::snapshot::snapshot_frame;

/// Why a session stopped stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The process exited, or no valid thread/frame remained, or the backend failed mid-run
    Completed,
    /// `max_steps` steps were recorded
    StepLimit,
    /// Too many consecutive non-recordable stops. `graceful` when user code
    /// was reached earlier (the program trailed off into library cleanup).
    Stuck { graceful: bool },
    /// Wall-clock budget exhausted
    Timeout,
}

impl EndReason {
    #[must_use]
    pub fn terminal_kind(self) -> StepKind {
        match self {
            EndReason::Timeout => StepKind::Timeout,
            _ => StepKind::ProgramEnd,
        }
    }
}

/// Statistics about a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub end_reason: EndReason,
    pub pid: Option<Pid>,
    pub elapsed: Duration,
    /// Steps recorded before the terminal step
    pub recorded_steps: usize,
    /// Stop events examined, recorded or not
    pub stop_events: usize,
    /// Percentage of classified frames that had a line entry
    pub debug_info_coverage: f64,
}

/// Trace and report of one finished session.
#[derive(Debug, Clone)]
pub struct TraceOutcome {
    pub document: TraceDocument,
    pub report: SessionReport,
}

/// Append-only step list that assigns ids.
#[derive(Debug, Default)]
struct TraceBuffer {
    steps: Vec<Step>,
}

impl TraceBuffer {
    fn push(
        &mut self,
        kind: StepKind,
        line: u32,
        function: Option<String>,
        explanation: String,
        detail: StepDetail,
        state: StepState,
    ) {
        let id = self.steps.len();
        self.steps.push(Step { id, kind, line, function, explanation, detail, state });
    }
}

/// Mutable per-run state of the driver loop.
struct SessionState {
    dedup: Deduplicator,
    previous_locals: Locals,
    step_count: usize,
    stuck_count: usize,
    stop_events: usize,
    last_line: u32,
    started_at: Instant,
}

/// Kills the target on every exit path, including unwinding.
struct LiveProcess<'a, B: DebugBackend> {
    backend: &'a mut B,
}

impl<B: DebugBackend> Drop for LiveProcess<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.kill() {
            warn!("Failed to kill target process: {e}");
        }
    }
}

/// One tracing run over a backend.
pub struct Session<'a, B: DebugBackend> {
    backend: &'a mut B,
    config: &'a TracerConfig,
    filter: UserCodeFilter,
}

impl<'a, B: DebugBackend> Session<'a, B> {
    pub fn new(backend: &'a mut B, config: &'a TracerConfig, filter: UserCodeFilter) -> Self {
        Self { backend, config, filter }
    }

    /// Trace `executable` to completion.
    ///
    /// # Errors
    /// [`BackendError::TargetCreateFailed`] or [`BackendError::LaunchFailed`];
    /// everything after launch ends the run normally
    pub fn run(self, executable: &Path) -> Result<TraceOutcome, BackendError> {
        let Session { backend, config, filter } = self;
        let started_at = Instant::now();
        let mut guard = LiveProcess { backend };

        guard.backend.create_target(executable)?;
        info!("Target created: {}", executable.display());

        let pid = guard.backend.launch(&LaunchOptions { stop_at_entry: config.stop_at_entry })?;
        info!("Process launched ({pid})");

        let token = CancellationToken::new();
        let remaining = config.timeout.saturating_sub(started_at.elapsed());
        let alarm = match TimeoutAlarm::arm(remaining, token.clone(), guard.backend.interrupter()) {
            Ok(alarm) => Some(alarm),
            Err(e) => {
                warn!("Timeout watchdog unavailable, checking budget between steps only: {e}");
                None
            }
        };

        let mut state = SessionState {
            dedup: Deduplicator::new(filter),
            previous_locals: Locals::new(),
            step_count: 0,
            stuck_count: 0,
            stop_events: 0,
            last_line: 0,
            started_at,
        };
        let mut trace = TraceBuffer::default();

        let end_reason = drive(&mut *guard.backend, config, &token, &mut state, &mut trace);

        if let Some(alarm) = alarm {
            alarm.disarm();
        }
        drop(guard);
        info!("Session ended: {end_reason:?} after {} steps", state.step_count);

        append_terminal_step(&mut trace, end_reason, &state, config);

        let report = SessionReport {
            end_reason,
            pid: Some(pid),
            elapsed: started_at.elapsed(),
            recorded_steps: state.step_count,
            stop_events: state.stop_events,
            debug_info_coverage: state.dedup.filter().diagnostics().debug_info_coverage(),
        };
        if state.dedup.filter().diagnostics().saw_no_line_info() {
            warn!("No stop had line information; was the target compiled with -g?");
        }

        Ok(TraceOutcome { document: TraceDocument::new(trace.steps), report })
    }
}

/// The driver loop. Never fails: backend errors end the run as completed.
fn drive<B: DebugBackend>(
    backend: &mut B,
    config: &TracerConfig,
    token: &CancellationToken,
    state: &mut SessionState,
    trace: &mut TraceBuffer,
) -> EndReason {
    loop {
        if token.is_cancelled() || state.started_at.elapsed() >= config.timeout {
            return EndReason::Timeout;
        }

        if !backend.process_state().is_stopped() {
            debug!("Process no longer stopped");
            return EndReason::Completed;
        }

        let (thread, frame) = match current_frame(backend) {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!("No valid thread or frame");
                return EndReason::Completed;
            }
            Err(e) => {
                warn!("Lost the target while inspecting a stop: {e}");
                return EndReason::Completed;
            }
        };
        state.stop_events += 1;
        debug!("Stop in {} at {:?}:{:?}", frame.function, frame.file.as_ref().map(|f| &f.name), frame.line);

        match state.dedup.should_record(&frame, || backend.stack_depth(thread)) {
            Ok(true) => {
                if let Err(e) = record_step(backend, thread, &frame, state, trace) {
                    warn!("Failed to snapshot {}: {e}", frame.function);
                    return EndReason::Completed;
                }
                state.stuck_count = 0;
            }
            Ok(false) => state.stuck_count += 1,
            Err(e) => {
                warn!("Failed to read stack depth: {e}");
                return EndReason::Completed;
            }
        }

        if state.stuck_count > config.stuck_threshold {
            let graceful = state.dedup.found_user_code();
            if graceful {
                info!("Left user code for {} stops, ending trace", state.stuck_count);
            } else {
                warn!("Never reached user code after {} stops", state.stuck_count);
            }
            return EndReason::Stuck { graceful };
        }

        if let Err(e) = backend.step(thread, config.granularity) {
            if token.is_cancelled() {
                return EndReason::Timeout;
            }
            warn!("Step failed: {e}");
            return EndReason::Completed;
        }

        if state.step_count >= config.max_steps {
            return EndReason::StepLimit;
        }
    }
}

fn current_frame<B: DebugBackend>(backend: &mut B) -> Result<Option<(ThreadId, FrameLocation)>, BackendError> {
    let Some(thread) = backend.selected_thread()? else {
        return Ok(None);
    };
    Ok(backend.selected_frame(thread)?.map(|frame| (thread, frame)))
}

fn record_step<B: DebugBackend>(
    backend: &mut B,
    thread: ThreadId,
    frame: &FrameLocation,
    state: &mut SessionState,
    trace: &mut TraceBuffer,
) -> Result<(), BackendError> {
    let info = snapshot_frame(backend, thread, frame)?;
    let class = classify(&info, &state.previous_locals);

    let binding = class.variable().and_then(|name| info.locals.get(name)).map(VariableBinding::from);
    let detail = StepDetail {
        class_name: class.class_name().map(str::to_string),
        object_name: match class.kind() {
            StepKind::ObjectCreation => class.variable().map(str::to_string),
            _ => None,
        },
        variable: class.variable().map(str::to_string),
        binding,
    };

    let line = info.line;
    debug!("Step {}: {} at line {line}", state.step_count, class.kind());
    state.previous_locals = info.locals.clone();
    let function = Some(info.function.clone());
    trace.push(class.kind(), line, function, class.explain(line), detail, StepState::with_frame(info));

    state.step_count += 1;
    state.last_line = line;
    Ok(())
}

fn append_terminal_step(
    trace: &mut TraceBuffer,
    end_reason: EndReason,
    state: &SessionState,
    config: &TracerConfig,
) {
    let explanation = match end_reason {
        EndReason::Completed => "Program execution completed".to_string(),
        EndReason::StepLimit => {
            format!("Stopped after reaching the limit of {} steps", config.max_steps)
        }
        EndReason::Stuck { graceful: true } => {
            "Program execution completed (remaining code is outside user sources)".to_string()
        }
        EndReason::Stuck { graceful: false } => {
            format!("Stopped: no user code reached after {} stops", state.stuck_count)
        }
        EndReason::Timeout => format!("Execution timed out after {} ms", config.timeout.as_millis()),
    };
    trace.push(
        end_reason.terminal_kind(),
        state.last_line,
        None,
        explanation,
        StepDetail::default(),
        StepState::default(),
    );
}
