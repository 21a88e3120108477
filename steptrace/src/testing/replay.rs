//! Replaying debug backend.
//!
//! A [`ReplayScript`] is a list of stops. Launching halts at the first one;
//! each step advances to the next, and stepping past the last stop exits the
//! process (unless the script loops). Variables are plain trees, so every
//! structural shape the snapshot extractor handles can be written down.
//!
//! # Example
//!
//! ```ignore
//! use steptrace::testing::{ReplayBackend, ReplayScript, ReplayStop, ReplayVariable};
//!
//! let script = ReplayScript::from_stops(vec![
//!     ReplayStop::without_line_info("_start"),
//!     ReplayStop::at("main", "/src/main.c", 3),
//!     ReplayStop::at("main", "/src/main.c", 4)
//!         .with_variables(vec![ReplayVariable::scalar("x", "int", "5")]),
//! ]);
//! let backend = ReplayBackend::new(script);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use steptrace_common::{hex_address, VariableScope};

use crate::backend::{
    DebugBackend, FrameLocation, Interrupt, LaunchOptions, ProcessState, SourceFile,
    StepGranularity, TypeClass, VariableInfo,
};
use crate::domain::{BackendError, Pid, SetupError, ThreadId};

/// PID reported by replayed launches. Above the kernel's PID limit, so it
/// never names a real process.
pub const REPLAY_PID: Pid = Pid(4_194_305);

const REPLAY_THREAD: ThreadId = ThreadId(1);

/// Granularity of interruptible sleeps during a delayed step.
const DELAY_SLICE: Duration = Duration::from_millis(5);

/// A scripted debugging session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScript {
    pub stops: Vec<ReplayStop>,
    /// Wrap around to the first stop instead of exiting
    #[serde(default)]
    pub looping: bool,
    /// Simulated wall-clock cost of every step
    #[serde(default)]
    pub step_delay_ms: u64,
}

impl ReplayScript {
    #[must_use]
    pub fn from_stops(stops: Vec<ReplayStop>) -> Self {
        Self { stops, ..Self::default() }
    }

    /// Load a script from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid script
    pub fn from_file(path: &Path) -> Result<Self, SetupError> {
        let content = std::fs::read_to_string(path).map_err(|error| {
            SetupError::ReplayScriptUnreadable { path: path.to_path_buf(), error }
        })?;
        serde_json::from_str(&content)
            .map_err(|error| SetupError::ReplayScriptMalformed { path: path.to_path_buf(), error })
    }
}

/// One halt of the replayed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStop {
    pub function: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default)]
    pub variables: Vec<ReplayVariable>,
}

fn default_depth() -> usize {
    1
}

impl ReplayStop {
    /// A stop with a line entry.
    pub fn at(function: impl Into<String>, file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            function: function.into(),
            file: Some(file.into()),
            line: Some(line),
            depth: default_depth(),
            variables: Vec::new(),
        }
    }

    /// A stop in code without debug information (start-up, libc, loader).
    pub fn without_line_info(function: impl Into<String>) -> Self {
        Self { function: function.into(), file: None, line: None, depth: default_depth(), variables: Vec::new() }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Vec<ReplayVariable>) -> Self {
        self.variables = variables;
        self
    }

    fn location(&self) -> FrameLocation {
        FrameLocation {
            function: self.function.clone(),
            file: self.file.as_ref().map(SourceFile::new),
            line: self.line,
        }
    }
}

/// A variable as the replayed backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub class: TypeClass,
    #[serde(default, with = "hex_address")]
    pub address: Option<u64>,
    #[serde(default)]
    pub argument: bool,
    #[serde(default)]
    pub children: Vec<ReplayVariable>,
}

impl ReplayVariable {
    pub fn scalar(name: impl Into<String>, type_name: impl Into<String>, value: &str) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: Some(value.to_string()),
            class: TypeClass::Scalar,
            address: None,
            argument: false,
            children: Vec::new(),
        }
    }

    /// A struct/class variable, rendered as `{...}` like a debugger would.
    pub fn aggregate(
        name: impl Into<String>,
        type_name: impl Into<String>,
        members: Vec<ReplayVariable>,
    ) -> Self {
        Self { class: TypeClass::Aggregate, children: members, ..Self::scalar(name, type_name, "{...}") }
    }

    pub fn array(
        name: impl Into<String>,
        type_name: impl Into<String>,
        elements: Vec<ReplayVariable>,
    ) -> Self {
        let summary = format!("[{}]", elements.len());
        Self { class: TypeClass::Array, children: elements, ..Self::scalar(name, type_name, &summary) }
    }

    /// A variable with neither value nor address (optimized out, in a register).
    pub fn unavailable(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { value: None, ..Self::scalar(name, type_name, "") }
    }

    #[must_use]
    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    #[must_use]
    pub fn as_argument(mut self) -> Self {
        self.argument = true;
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<ReplayVariable>) -> Self {
        self.children = children;
        self
    }
}

/// Sets a flag that cuts a delayed step short.
struct FlagInterrupter(Arc<AtomicBool>);

impl Interrupt for FlagInterrupter {
    fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// [`DebugBackend`] that replays a [`ReplayScript`].
#[derive(Debug)]
pub struct ReplayBackend {
    script: ReplayScript,
    cursor: usize,
    launched: bool,
    exited: bool,
    killed: bool,
    fail_target: Option<String>,
    fail_launch: Option<String>,
    interrupted: Arc<AtomicBool>,
    steps_taken: usize,
    granularities: Vec<StepGranularity>,
}

impl ReplayBackend {
    #[must_use]
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script,
            cursor: 0,
            launched: false,
            exited: false,
            killed: false,
            fail_target: None,
            fail_launch: None,
            interrupted: Arc::new(AtomicBool::new(false)),
            steps_taken: 0,
            granularities: Vec::new(),
        }
    }

    /// Load a script file and build a backend for it.
    ///
    /// # Errors
    /// Returns an error if the script cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, SetupError> {
        ReplayScript::from_file(path).map(Self::new)
    }

    /// Wrap around to the first stop forever.
    #[must_use]
    pub fn looping(mut self) -> Self {
        self.script.looping = true;
        self
    }

    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.script.step_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Make `create_target` fail with `reason`.
    #[must_use]
    pub fn failing_target(mut self, reason: impl Into<String>) -> Self {
        self.fail_target = Some(reason.into());
        self
    }

    /// Make `launch` fail with `reason`.
    #[must_use]
    pub fn failing_launch(mut self, reason: impl Into<String>) -> Self {
        self.fail_launch = Some(reason.into());
        self
    }

    /// Whether the replayed process would still be running.
    #[must_use]
    pub fn is_process_alive(&self) -> bool {
        self.launched && !self.exited && !self.killed
    }

    #[must_use]
    pub fn was_killed(&self) -> bool {
        self.killed
    }

    #[must_use]
    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Granularity requested by each step, in order.
    #[must_use]
    pub fn granularities(&self) -> &[StepGranularity] {
        &self.granularities
    }

    fn current(&self) -> Option<&ReplayStop> {
        if !self.is_process_alive() || self.script.stops.is_empty() {
            return None;
        }
        if self.script.looping {
            self.script.stops.get(self.cursor % self.script.stops.len())
        } else {
            self.script.stops.get(self.cursor)
        }
    }

    /// Sleep for the step delay, returning early when interrupted.
    fn simulate_delay(&self) {
        let delay = Duration::from_millis(self.script.step_delay_ms);
        if delay.is_zero() {
            return;
        }
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(DELAY_SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

impl DebugBackend for ReplayBackend {
    type Variable = ReplayVariable;

    fn create_target(&mut self, executable: &Path) -> Result<(), BackendError> {
        match &self.fail_target {
            Some(reason) => Err(BackendError::TargetCreateFailed {
                path: executable.to_path_buf(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn launch(&mut self, _options: &LaunchOptions) -> Result<Pid, BackendError> {
        if let Some(reason) = &self.fail_launch {
            return Err(BackendError::LaunchFailed(reason.clone()));
        }
        self.launched = true;
        self.exited = self.script.stops.is_empty();
        Ok(REPLAY_PID)
    }

    fn process_state(&mut self) -> ProcessState {
        if !self.launched {
            ProcessState::Unknown
        } else if self.is_process_alive() {
            ProcessState::Stopped
        } else {
            ProcessState::Exited
        }
    }

    fn process_id(&self) -> Option<Pid> {
        self.launched.then_some(REPLAY_PID)
    }

    fn selected_thread(&mut self) -> Result<Option<ThreadId>, BackendError> {
        Ok(self.current().map(|_| REPLAY_THREAD))
    }

    fn selected_frame(&mut self, _thread: ThreadId) -> Result<Option<FrameLocation>, BackendError> {
        Ok(self.current().map(ReplayStop::location))
    }

    fn stack_depth(&mut self, _thread: ThreadId) -> Result<usize, BackendError> {
        self.current().map(|stop| stop.depth).ok_or(BackendError::NoProcess)
    }

    fn frame_variables(&mut self, _thread: ThreadId) -> Result<Vec<ReplayVariable>, BackendError> {
        Ok(self.current().map(|stop| stop.variables.clone()).unwrap_or_default())
    }

    fn describe(&mut self, var: &ReplayVariable) -> Result<VariableInfo, BackendError> {
        Ok(VariableInfo {
            name: var.name.clone(),
            type_name: var.type_name.clone(),
            value: var.value.clone(),
            type_class: var.class,
            child_count: var.children.len(),
            scope: if var.argument { VariableScope::Argument } else { VariableScope::Local },
        })
    }

    fn address_of(&mut self, var: &ReplayVariable) -> Result<Option<u64>, BackendError> {
        Ok(var.address)
    }

    fn child_at(&mut self, var: &ReplayVariable, index: usize) -> Result<Option<ReplayVariable>, BackendError> {
        Ok(var.children.get(index).cloned())
    }

    fn step(&mut self, _thread: ThreadId, granularity: StepGranularity) -> Result<(), BackendError> {
        if !self.is_process_alive() {
            return Err(BackendError::NoProcess);
        }
        self.simulate_delay();
        self.granularities.push(granularity);
        self.steps_taken += 1;
        self.cursor += 1;
        if !self.script.looping && self.cursor >= self.script.stops.len() {
            self.exited = true;
        }
        Ok(())
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(Arc::new(FlagInterrupter(Arc::clone(&self.interrupted))))
    }

    fn kill(&mut self) -> Result<(), BackendError> {
        if self.is_process_alive() {
            self.killed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launched(script: ReplayScript) -> ReplayBackend {
        let mut backend = ReplayBackend::new(script);
        backend.launch(&LaunchOptions { stop_at_entry: true }).unwrap();
        backend
    }

    #[test]
    fn test_steps_through_stops_then_exits() {
        let mut backend = launched(ReplayScript::from_stops(vec![
            ReplayStop::at("main", "/src/a.c", 1),
            ReplayStop::at("main", "/src/a.c", 2),
        ]));
        assert_eq!(backend.process_state(), ProcessState::Stopped);
        assert_eq!(backend.selected_frame(REPLAY_THREAD).unwrap().unwrap().line, Some(1));

        backend.step(REPLAY_THREAD, StepGranularity::Over).unwrap();
        assert_eq!(backend.selected_frame(REPLAY_THREAD).unwrap().unwrap().line, Some(2));

        backend.step(REPLAY_THREAD, StepGranularity::Over).unwrap();
        assert_eq!(backend.process_state(), ProcessState::Exited);
        assert!(backend.selected_thread().unwrap().is_none());
        assert!(!backend.was_killed());
    }

    #[test]
    fn test_looping_never_exits() {
        let mut backend = launched(ReplayScript::from_stops(vec![ReplayStop::without_line_info("poll")]))
            .looping();
        for _ in 0..10 {
            backend.step(REPLAY_THREAD, StepGranularity::Over).unwrap();
        }
        assert_eq!(backend.process_state(), ProcessState::Stopped);
        assert_eq!(backend.steps_taken(), 10);
    }

    #[test]
    fn test_kill_only_affects_live_process() {
        let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![ReplayStop::at("main", "/a.c", 1)]));
        backend.kill().unwrap();
        assert!(!backend.was_killed());

        backend.launch(&LaunchOptions { stop_at_entry: true }).unwrap();
        backend.kill().unwrap();
        assert!(backend.was_killed());
        assert!(!backend.is_process_alive());
    }

    #[test]
    fn test_interrupt_cuts_delay_short() {
        let mut backend = launched(ReplayScript::from_stops(vec![ReplayStop::at("main", "/a.c", 1)]))
            .looping()
            .with_step_delay(Duration::from_secs(30));
        backend.interrupter().unwrap().interrupt();

        let started = Instant::now();
        backend.step(REPLAY_THREAD, StepGranularity::Over).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_script_json_shape() {
        let json = r#"{
            "stops": [
                {"function": "_start"},
                {"function": "main", "file": "/src/p.cpp", "line": 9, "depth": 2,
                 "variables": [
                    {"name": "p", "type": "Point", "value": "{...}", "class": "aggregate",
                     "address": "0x7ffd10", "children": [{"name": "x", "type": "int", "value": "1"}]},
                    {"name": "argc", "type": "int", "value": "1", "argument": true}
                 ]}
            ],
            "looping": false
        }"#;
        let script: ReplayScript = serde_json::from_str(json).unwrap();
        assert_eq!(script.stops.len(), 2);
        assert_eq!(script.stops[0].depth, 1);
        assert_eq!(script.stops[0].line, None);

        let p = &script.stops[1].variables[0];
        assert_eq!(p.class, TypeClass::Aggregate);
        assert_eq!(p.address, Some(0x7f_fd10));
        assert!(script.stops[1].variables[1].argument);
    }

    #[test]
    fn test_unreadable_script() {
        let err = ReplayScript::from_file(Path::new("/nonexistent/script.json")).unwrap_err();
        assert!(matches!(err, SetupError::ReplayScriptUnreadable { .. }));
    }
}
