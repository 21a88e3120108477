//! # GDB Machine-Interface Backend
//!
//! Runs `gdb --interpreter=mi2` as a child process and speaks GDB/MI over its
//! stdin/stdout pipes. Every command carries a numeric token; replies are read
//! until the result record with the matching token, and asynchronous records
//! seen on the way update the cached process state:
//!
//! ```text
//!   =thread-group-started,pid="N"   → pid
//!   *running                        → Running
//!   *stopped,reason="exited..."     → Exited
//!   *stopped (any other reason)     → Stopped
//! ```
//!
//! Code without line entries is never stepped: the adapter breaks on every
//! function of the user's sources (`rbreak <file>:.`) plus `main`, and a
//! frame without a line entry continues to the next of those breakpoints.
//! They are disabled while stepping through code that has line entries, so
//! `next` still steps over calls.
//!
//! Variables are GDB variable objects (`-var-create`), deleted again before
//! the next step so they never outlive the frame they were read from.
//!
//! The inferior's standard streams are redirected away from the tracer so
//! nothing the traced program prints can interleave with the trace document.

pub mod mi;

use log::{debug, trace, warn};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;

use steptrace_common::VariableScope;

use self::mi::{quote, AsyncKind, MiRecord, MiValue, ResultClass, Results};
use super::{
    DebugBackend, FrameLocation, Interrupt, LaunchOptions, ProcessState, SourceFile,
    StepGranularity, TypeClass, VariableInfo,
};
use crate::classification::{classify_source, FilterTables};
use crate::domain::{BackendError, Pid, ThreadId};
use crate::process_lookup::{is_process_running, send_signal};

/// Settings applied after the target is loaded. Failures are logged, not fatal.
const TARGET_SETTINGS: &[&str] = &["-gdb-set confirm off", "-gdb-set pagination off", "-enable-pretty-printing"];

/// Always a resume point, even when no user source is found.
const ENTRY_FUNCTION: &str = "main";

/// Settings that need a live process on some GDB versions.
const PROCESS_SETTINGS: &[&str] = &["-gdb-set scheduler-locking step"];

/// Access-specifier pseudo children that GDB inserts for C++ classes.
const ACCESS_SPECIFIERS: &[&str] = &["public", "private", "protected"];

/// How the GDB child process is started.
#[derive(Debug, Clone)]
pub struct GdbOptions {
    pub debugger: PathBuf,
    /// Where the inferior's stdin/stdout/stderr are connected
    pub program_output: PathBuf,
    /// Primary source file, always treated as user code
    pub target_source: Option<PathBuf>,
    /// Decide which of the executable's sources get resume breakpoints
    pub tables: FilterTables,
}

impl Default for GdbOptions {
    fn default() -> Self {
        Self {
            debugger: PathBuf::from("gdb"),
            program_output: PathBuf::from("/dev/null"),
            target_source: None,
            tables: FilterTables::default(),
        }
    }
}

/// Handle to a GDB variable object.
#[derive(Debug, Clone, PartialEq)]
pub struct GdbVariable {
    /// Variable object name (`var3`, `var3.x`)
    varobj: String,
    /// Display name (`total`, `x`, `[2]`)
    name: String,
    type_name: String,
    value: Option<String>,
    child_count: usize,
    display_hint: Option<String>,
    dynamic: bool,
    scope: VariableScope,
    thread: ThreadId,
}

impl GdbVariable {
    fn from_results(results: &Results, name: &str, scope: VariableScope, thread: ThreadId) -> Option<Self> {
        Some(Self {
            varobj: results.get_str("name")?.to_string(),
            name: name.to_string(),
            type_name: results.get_str("type").unwrap_or_default().to_string(),
            value: results.get_str("value").map(str::to_string),
            child_count: results.get_str("numchild").and_then(|n| n.parse().ok()).unwrap_or(0),
            display_hint: results.get_str("displayhint").map(str::to_string),
            dynamic: results.get_str("dynamic") == Some("1"),
            scope,
            thread,
        })
    }

    fn from_child(child: &MiValue, scope: VariableScope, thread: ThreadId) -> Option<Self> {
        Some(Self {
            varobj: child.get_str("name")?.to_string(),
            name: child.get_str("exp").unwrap_or_default().to_string(),
            type_name: child.get_str("type").unwrap_or_default().to_string(),
            value: child.get_str("value").map(str::to_string),
            child_count: child.get_str("numchild").and_then(|n| n.parse().ok()).unwrap_or(0),
            display_hint: child.get_str("displayhint").map(str::to_string),
            dynamic: child.get_str("dynamic") == Some("1"),
            scope,
            thread,
        })
    }

    /// GDB's `public`/`private`/`protected` grouping nodes carry no type.
    fn is_access_specifier(&self) -> bool {
        self.type_name.is_empty() && ACCESS_SPECIFIERS.contains(&self.name.as_str())
    }

    fn type_class(&self) -> TypeClass {
        let value = self.value.as_deref().unwrap_or_default();
        if self.display_hint.as_deref() == Some("array")
            || self.type_name.contains('[')
            || (value.starts_with('[') && value.ends_with(']'))
        {
            TypeClass::Array
        } else if value == "{...}" || self.display_hint.as_deref() == Some("map") {
            TypeClass::Aggregate
        } else {
            TypeClass::Scalar
        }
    }
}

/// Sends SIGINT to the inferior, which makes GDB report a stop.
struct SignalInterrupter {
    pid: Pid,
}

impl Interrupt for SignalInterrupter {
    fn interrupt(&self) {
        if let Err(e) = send_signal(self.pid, libc::SIGINT) {
            warn!("Failed to interrupt {}: {e}", self.pid);
        }
    }
}

/// [`DebugBackend`] backed by a GDB child process.
pub struct GdbBackend {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    options: GdbOptions,
    next_token: u64,
    state: ProcessState,
    pid: Option<Pid>,
    /// Set by every `*stopped` record; cleared before resuming
    stop_seen: bool,
    /// Frame last returned by `selected_frame`, until the next resume
    current_frame: Option<(ThreadId, FrameLocation)>,
    varobjs: Vec<String>,
    /// Resume breakpoints were inserted after launch
    resume_breakpoints: bool,
    breakpoints_enabled: bool,
}

impl GdbBackend {
    /// Start the debugger.
    ///
    /// # Errors
    /// [`BackendError::SpawnFailed`] if the debugger binary cannot be executed
    pub fn spawn(options: &GdbOptions) -> Result<Self, BackendError> {
        let mut child = Command::new(&options.debugger)
            .args(["--interpreter=mi2", "--nx", "--quiet"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| BackendError::SpawnFailed {
                debugger: options.debugger.display().to_string(),
                error,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BackendError::Protocol("debugger pipes unavailable".to_string()));
        };

        debug!("Started {} (debugger PID {})", options.debugger.display(), child.id());

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            options: options.clone(),
            next_token: 1,
            state: ProcessState::Unknown,
            pid: None,
            stop_seen: false,
            current_frame: None,
            varobjs: Vec::new(),
            resume_breakpoints: false,
            breakpoints_enabled: false,
        })
    }

    // ========================================================================
    // MI transport
    // ========================================================================

    fn send(&mut self, command: &str) -> Result<u64, BackendError> {
        let token = self.next_token;
        self.next_token += 1;
        trace!("gdb <- {token}{command}");
        writeln!(self.stdin, "{token}{command}")?;
        self.stdin.flush()?;
        Ok(token)
    }

    fn read_record(&mut self) -> Result<MiRecord, BackendError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            self.state = ProcessState::Exited;
            return Err(BackendError::DebuggerExited);
        }
        trace!("gdb -> {}", line.trim_end());

        let record = match mi::parse_line(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring unparsable debugger output: {e}");
                MiRecord::Raw(line)
            }
        };
        self.observe(&record);
        Ok(record)
    }

    /// Track process state from asynchronous records.
    fn observe(&mut self, record: &MiRecord) {
        let MiRecord::Async { kind, class, results, .. } = record else {
            return;
        };
        match (kind, class.as_str()) {
            (AsyncKind::Notify, "thread-group-started") => {
                self.pid = results.get_str("pid").and_then(|p| p.parse().ok()).map(Pid);
            }
            (AsyncKind::Notify, "thread-group-exited") => {
                self.state = ProcessState::Exited;
            }
            (AsyncKind::Exec, "running") => self.state = ProcessState::Running,
            (AsyncKind::Exec, "stopped") => {
                self.stop_seen = true;
                let reason = results.get_str("reason").unwrap_or_default();
                self.state = if reason.starts_with("exited") {
                    debug!(
                        "Process exited ({reason}, code {})",
                        results.get_str("exit-code").unwrap_or("0")
                    );
                    ProcessState::Exited
                } else {
                    ProcessState::Stopped
                };
            }
            _ => {}
        }
    }

    /// Run one command and return its result record's fields.
    fn execute(&mut self, command: &str) -> Result<Results, BackendError> {
        let token = self.send(command)?;
        loop {
            if let MiRecord::Result { token: Some(t), class, results } = self.read_record()? {
                if t != token {
                    continue;
                }
                return match class {
                    ResultClass::Error => Err(BackendError::CommandFailed {
                        command: command.to_string(),
                        message: results.get_str("msg").unwrap_or("unknown error").to_string(),
                    }),
                    ResultClass::Exit => Err(BackendError::DebuggerExited),
                    ResultClass::Running => {
                        self.state = ProcessState::Running;
                        Ok(results)
                    }
                    ResultClass::Done | ResultClass::Connected => Ok(results),
                };
            }
        }
    }

    /// Run an execution command and block until the target stops or exits.
    fn resume(&mut self, command: &str) -> Result<(), BackendError> {
        self.stop_seen = false;
        self.current_frame = None;
        self.execute(command)?;
        while !self.stop_seen && self.state != ProcessState::Exited {
            self.read_record()?;
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: &[&str]) {
        for setting in settings {
            if let Err(e) = self.execute(setting) {
                warn!("Debugger setting `{setting}` not applied: {e}");
            }
        }
    }

    /// Source files of the executable that count as user code.
    fn user_sources(&mut self) -> Vec<PathBuf> {
        let results = match self.execute("-file-list-exec-source-files") {
            Ok(results) => results,
            Err(e) => {
                debug!("Source files not listed: {e}");
                return Vec::new();
            }
        };

        let target_path = self
            .options
            .target_source
            .as_deref()
            .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
        let target_name = self
            .options
            .target_source
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());

        let mut sources = Vec::new();
        for entry in results.get("files").map(MiValue::items).unwrap_or_default() {
            let Some(source) = source_file(entry.get_str("fullname"), entry.get_str("file")) else {
                continue;
            };
            let origin =
                classify_source(&source, target_path.as_deref(), target_name.as_deref(), &self.options.tables);
            if origin.is_user_code() && !sources.contains(&source.path) {
                sources.push(source.path);
            }
        }
        sources
    }

    /// Break on every function defined in the user's sources, and on `main`.
    fn insert_resume_breakpoints(&mut self) {
        for source in self.user_sources() {
            let source = source.to_string_lossy().into_owned();
            if source.contains(char::is_whitespace) {
                debug!("No resume breakpoints for {source}: path contains whitespace");
                continue;
            }
            let command = format!("-interpreter-exec console {}", quote(&format!("rbreak {source}:.")));
            match self.execute(&command) {
                Ok(_) => self.resume_breakpoints = true,
                Err(e) => warn!("No resume breakpoints for {source}: {e}"),
            }
        }
        match self.execute(&format!("-break-insert {ENTRY_FUNCTION}")) {
            Ok(_) => self.resume_breakpoints = true,
            Err(e) => warn!("No `{ENTRY_FUNCTION}` breakpoint: {e}"),
        }
        if !self.resume_breakpoints {
            warn!("No resume breakpoints, code without line info is stepped until it returns");
        }
        self.breakpoints_enabled = self.resume_breakpoints;
    }

    fn set_breakpoints_enabled(&mut self, enabled: bool) {
        if !self.resume_breakpoints || self.breakpoints_enabled == enabled {
            return;
        }
        let command = if enabled { "enable" } else { "disable" };
        match self.execute(&format!("-interpreter-exec console {}", quote(command))) {
            Ok(_) => self.breakpoints_enabled = enabled,
            Err(e) => warn!("Failed to {command} resume breakpoints: {e}"),
        }
    }

    fn release_varobjs(&mut self) {
        for varobj in std::mem::take(&mut self.varobjs) {
            if let Err(e) = self.execute(&format!("-var-delete {varobj}")) {
                debug!("Failed to delete {varobj}: {e}");
            }
        }
    }

    fn list_children(&mut self, var: &GdbVariable, limit: usize) -> Result<Vec<GdbVariable>, BackendError> {
        let range = i32::try_from(limit).map_or_else(|_| String::new(), |n| format!(" 0 {n}"));
        let results = self.execute(&format!("-var-list-children --all-values {}{range}", var.varobj))?;

        let mut children = Vec::new();
        let listed = results.get("children").map(MiValue::items).unwrap_or_default();
        for child in listed {
            if children.len() >= limit {
                break;
            }
            let Some(child) = GdbVariable::from_child(child, var.scope, var.thread) else {
                continue;
            };
            if child.is_access_specifier() {
                let remaining = limit - children.len();
                children.extend(self.list_children(&child, remaining)?);
            } else {
                children.push(child);
            }
        }
        children.truncate(limit);
        Ok(children)
    }

    fn shutdown(&mut self) {
        if let Some(pid) = self.pid.take() {
            if is_process_running(pid) {
                let _ = send_signal(pid, libc::SIGKILL);
            }
        }
        let _ = writeln!(self.stdin, "-gdb-exit");
        let _ = self.stdin.flush();
        if let Err(e) = self.child.kill() {
            trace!("Debugger already gone: {e}");
        }
        let _ = self.child.wait();
    }
}

impl DebugBackend for GdbBackend {
    type Variable = GdbVariable;

    fn create_target(&mut self, executable: &Path) -> Result<(), BackendError> {
        self.execute(&format!("-file-exec-and-symbols {}", quote(&executable.to_string_lossy())))
            .map_err(|e| match e {
                BackendError::CommandFailed { message, .. } => {
                    BackendError::TargetCreateFailed { path: executable.to_path_buf(), reason: message }
                }
                other => other,
            })?;

        self.apply_settings(TARGET_SETTINGS);
        let tty = format!("-inferior-tty-set {}", quote(&self.options.program_output.to_string_lossy()));
        self.apply_settings(&[tty.as_str()]);
        Ok(())
    }

    fn launch(&mut self, options: &LaunchOptions) -> Result<Pid, BackendError> {
        let command = if options.stop_at_entry {
            "-interpreter-exec console \"starti\""
        } else {
            "-exec-run --start"
        };
        self.resume(command).map_err(|e| match e {
            BackendError::CommandFailed { message, .. } => BackendError::LaunchFailed(message),
            other => BackendError::LaunchFailed(other.to_string()),
        })?;

        let pid = self
            .pid
            .ok_or_else(|| BackendError::LaunchFailed("debugger reported no process".to_string()))?;
        if self.state.is_stopped() {
            self.apply_settings(PROCESS_SETTINGS);
            self.insert_resume_breakpoints();
        }
        Ok(pid)
    }

    fn process_state(&mut self) -> ProcessState {
        self.state
    }

    fn process_id(&self) -> Option<Pid> {
        self.pid
    }

    fn selected_thread(&mut self) -> Result<Option<ThreadId>, BackendError> {
        if !self.state.is_stopped() {
            return Ok(None);
        }
        let results = match self.execute("-thread-info") {
            Ok(results) => results,
            Err(BackendError::CommandFailed { message, .. }) => {
                debug!("No thread selected: {message}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(results.get_str("current-thread-id").and_then(|id| id.parse().ok()).map(ThreadId))
    }

    fn selected_frame(&mut self, thread: ThreadId) -> Result<Option<FrameLocation>, BackendError> {
        if let Some((cached_thread, frame)) = &self.current_frame {
            if *cached_thread == thread {
                return Ok(Some(frame.clone()));
            }
        }

        let results = match self.execute(&format!("-stack-info-frame --thread {} --frame 0", thread.0)) {
            Ok(results) => results,
            Err(BackendError::CommandFailed { message, .. }) => {
                debug!("No frame on {thread}: {message}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(frame) = results.get("frame") else {
            return Ok(None);
        };

        let function = frame.get_str("func").unwrap_or("unknown").to_string();
        let file = source_file(frame.get_str("fullname"), frame.get_str("file"));
        let line = frame.get_str("line").and_then(|l| l.parse().ok());

        let location = FrameLocation { function, file, line };
        self.current_frame = Some((thread, location.clone()));
        Ok(Some(location))
    }

    fn stack_depth(&mut self, thread: ThreadId) -> Result<usize, BackendError> {
        let results = self.execute(&format!("-stack-info-depth --thread {}", thread.0))?;
        results
            .get_str("depth")
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| BackendError::Protocol("stack depth missing".to_string()))
    }

    fn frame_variables(&mut self, thread: ThreadId) -> Result<Vec<GdbVariable>, BackendError> {
        self.release_varobjs();

        let listing = self.execute(&format!(
            "-stack-list-variables --thread {} --frame 0 --no-values",
            thread.0
        ))?;
        let entries = listing.get("variables").map(MiValue::items).unwrap_or_default();
        let mut names = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(name) = entry.get_str("name") else {
                continue;
            };
            let scope = if entry.get_str("arg") == Some("1") {
                VariableScope::Argument
            } else {
                VariableScope::Local
            };
            names.push((name.to_string(), scope));
        }

        let mut variables = Vec::with_capacity(names.len());
        for (name, scope) in names {
            let command =
                format!("-var-create --thread {} --frame 0 - * {}", thread.0, quote(&name));
            match self.execute(&command) {
                Ok(results) => {
                    if let Some(var) = GdbVariable::from_results(&results, &name, scope, thread) {
                        self.varobjs.push(var.varobj.clone());
                        variables.push(var);
                    }
                }
                Err(BackendError::CommandFailed { message, .. }) => {
                    debug!("Skipping variable {name}: {message}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(variables)
    }

    fn describe(&mut self, var: &GdbVariable) -> Result<VariableInfo, BackendError> {
        Ok(VariableInfo {
            name: var.name.clone(),
            type_name: var.type_name.clone(),
            value: var.value.clone(),
            type_class: var.type_class(),
            child_count: var.child_count,
            scope: var.scope,
        })
    }

    fn address_of(&mut self, var: &GdbVariable) -> Result<Option<u64>, BackendError> {
        let expression = match self.execute(&format!("-var-info-path-expression {}", var.varobj)) {
            Ok(results) => results.get_str("path_expr").unwrap_or(&var.name).to_string(),
            Err(BackendError::CommandFailed { .. }) => var.name.clone(),
            Err(e) => return Err(e),
        };

        let command = format!(
            "-data-evaluate-expression --thread {} --frame 0 {}",
            var.thread.0,
            quote(&format!("&({expression})"))
        );
        match self.execute(&command) {
            Ok(results) => Ok(results.get_str("value").and_then(parse_address)),
            Err(BackendError::CommandFailed { message, .. }) => {
                trace!("No address for {}: {message}", var.name);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn child_at(&mut self, var: &GdbVariable, index: usize) -> Result<Option<GdbVariable>, BackendError> {
        let mut children = self.list_children(var, index.saturating_add(1))?;
        Ok((children.len() > index).then(|| children.swap_remove(index)))
    }

    fn children(&mut self, var: &GdbVariable, limit: usize) -> Result<Vec<GdbVariable>, BackendError> {
        if var.child_count == 0 && !var.dynamic {
            return Ok(Vec::new());
        }
        self.list_children(var, limit)
    }

    fn step(&mut self, thread: ThreadId, granularity: StepGranularity) -> Result<(), BackendError> {
        let has_line = self.selected_frame(thread)?.is_some_and(|f| f.line_entry().is_some());
        self.release_varobjs();

        if !has_line && self.resume_breakpoints {
            self.set_breakpoints_enabled(true);
            return self.resume(&format!("-exec-continue --thread {}", thread.0));
        }
        self.set_breakpoints_enabled(false);
        // without a line entry, `step` runs until the function returns
        let command = match (has_line, granularity) {
            (true, StepGranularity::Over) => "-exec-next",
            (true, StepGranularity::Into) | (false, _) => "-exec-step",
        };
        self.resume(&format!("{command} --thread {}", thread.0))
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        self.pid.map(|pid| Arc::new(SignalInterrupter { pid }) as Arc<dyn Interrupt>)
    }

    fn kill(&mut self) -> Result<(), BackendError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        if self.state == ProcessState::Exited && !is_process_running(pid) {
            return Ok(());
        }

        if self.state != ProcessState::Running {
            if let Err(e) = self.execute("-interpreter-exec console \"kill\"") {
                debug!("Debugger kill failed: {e}");
            }
        }
        if is_process_running(pid) {
            send_signal(pid, libc::SIGKILL)?;
        }
        self.state = ProcessState::Exited;
        self.current_frame = None;
        self.varobjs.clear();
        debug!("Killed {pid}");
        Ok(())
    }
}

impl Drop for GdbBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Source file from a frame or source-list entry's `fullname` and `file`.
fn source_file(fullname: Option<&str>, file: Option<&str>) -> Option<SourceFile> {
    match (fullname, file) {
        (Some(full), Some(short)) => {
            let name = Path::new(short)
                .file_name()
                .map_or_else(|| short.to_string(), |n| n.to_string_lossy().into_owned());
            Some(SourceFile { path: PathBuf::from(full), name })
        }
        (Some(path), None) | (None, Some(path)) => Some(SourceFile::new(path)),
        (None, None) => None,
    }
}

/// Parse the address out of a rendered pointer value.
///
/// GDB prints `&x` as `(int *) 0x7fffffffe3cc` or, for functions and
/// strings, `0x5555... <symbol>`; the first hex token wins.
fn parse_address(value: &str) -> Option<u64> {
    let token = value
        .split_whitespace()
        .find(|t| t.starts_with("0x") || t.starts_with("0X"))?;
    let digits = token[2..].trim_end_matches(|c: char| !c.is_ascii_hexdigit());
    u64::from_str_radix(digits, 16).ok().filter(|a| *a != 0)
}
