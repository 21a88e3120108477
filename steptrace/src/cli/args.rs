//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tracer",
    about = "Record a source-level execution trace of a native program as JSON",
    after_help = "\
EXAMPLES:
    tracer ./a.out                              Trace with default budgets
    tracer ./a.out semantic.json                Prefer the source named in semantic info
    tracer --max-steps 50 --pretty ./a.out      Short, human-readable trace
    tracer --replay script.json ./a.out         Replay a scripted session (no debugger)"
)]
pub struct Args {
    /// Executable to trace (compiled with debug information)
    #[arg(value_name = "EXECUTABLE")]
    pub executable: PathBuf,

    /// Semantic-info JSON document (`source_file`, `constructors`)
    #[arg(value_name = "SEMANTIC_INFO")]
    pub semantic_info: Option<PathBuf>,

    /// Recorded steps before the session stops
    #[arg(long, default_value_t = crate::config::DEFAULT_MAX_STEPS)]
    pub max_steps: usize,

    /// Wall-clock budget for the whole session, in milliseconds
    #[arg(long, default_value_t = crate::config::DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Consecutive non-recordable stops before the session gives up
    #[arg(long, default_value_t = crate::config::DEFAULT_STUCK_THRESHOLD)]
    pub stuck_threshold: usize,

    /// Enter callees that have line information instead of stepping over them
    #[arg(long)]
    pub step_into: bool,

    /// Run to `main` before the first stop instead of halting at the first instruction
    #[arg(long)]
    pub start_at_main: bool,

    /// Debugger binary to drive
    #[arg(long, value_name = "PATH", default_value = "gdb")]
    pub gdb: PathBuf,

    /// Where the traced program's standard streams go
    #[arg(long, value_name = "PATH", default_value = "/dev/null")]
    pub program_output: PathBuf,

    /// Extra directory fragment to treat as non-user code (repeatable)
    #[arg(long = "deny-path", value_name = "FRAGMENT")]
    pub deny_paths: Vec<String>,

    /// Replay a JSON session script instead of running a debugger
    #[arg(long, value_name = "SCRIPT")]
    pub replay: Option<PathBuf>,

    /// Pretty-print the JSON document
    #[arg(long)]
    pub pretty: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
