//! Session configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::gdb::GdbOptions;
use crate::backend::StepGranularity;
use crate::classification::FilterTables;
use crate::cli::Args;

/// Recorded steps before a session ends with a step-limit terminal step
pub const DEFAULT_MAX_STEPS: usize = 200;

/// Wall-clock budget for a whole session
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Consecutive non-recordable stops before a session is declared stuck
pub const DEFAULT_STUCK_THRESHOLD: usize = 1000;

/// Budgets and backend settings for one tracing session.
#[derive(Debug, Clone, PartialEq)]
pub struct TracerConfig {
    pub max_steps: usize,
    pub timeout: Duration,
    pub stuck_threshold: usize,
    pub granularity: StepGranularity,
    pub stop_at_entry: bool,
    pub debugger: PathBuf,
    pub program_output: PathBuf,
    /// Directory fragments denied on top of the built-in tables
    pub extra_denied_dirs: Vec<String>,
    pub pretty: bool,
    pub quiet: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            granularity: StepGranularity::Over,
            stop_at_entry: true,
            debugger: PathBuf::from("gdb"),
            program_output: PathBuf::from("/dev/null"),
            extra_denied_dirs: Vec::new(),
            pretty: false,
            quiet: false,
        }
    }
}

impl TracerConfig {
    /// Built-in filter tables plus the extra denied directories.
    #[must_use]
    pub fn filter_tables(&self) -> FilterTables {
        FilterTables::default().with_denied_dirs(self.extra_denied_dirs.iter().cloned())
    }

    /// Options for starting the GDB backend.
    #[must_use]
    pub fn gdb_options(&self, target_source: Option<&Path>) -> GdbOptions {
        GdbOptions {
            debugger: self.debugger.clone(),
            program_output: self.program_output.clone(),
            target_source: target_source.map(Path::to_path_buf),
            tables: self.filter_tables(),
        }
    }
}

impl From<&Args> for TracerConfig {
    fn from(args: &Args) -> Self {
        Self {
            max_steps: args.max_steps,
            timeout: Duration::from_millis(args.timeout_ms),
            stuck_threshold: args.stuck_threshold,
            granularity: if args.step_into { StepGranularity::Into } else { StepGranularity::Over },
            stop_at_entry: !args.start_at_main,
            debugger: args.gdb.clone(),
            program_output: args.program_output.clone(),
            extra_denied_dirs: args.deny_paths.clone(),
            pretty: args.pretty,
            quiet: args.quiet,
        }
    }
}
