//! # tracer - Main Entry Point
//!
//! `tracer <executable> [semantic-info]` traces the executable under GDB and
//! prints one JSON trace document on stdout. Progress and diagnostics go to
//! stderr; fatal setup errors print nothing on stdout.
//!
//! With `--replay <script>` the session runs against a scripted backend
//! instead of a debugger.

// Time conversions lose precision for display
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::io;

use steptrace::backend::gdb::GdbBackend;
use steptrace::backend::DebugBackend;
use steptrace::classification::UserCodeFilter;
use steptrace::cli::Args;
use steptrace::config::TracerConfig;
use steptrace::engine::{EndReason, Session, TraceOutcome};
use steptrace::export::TraceExporter;
use steptrace::preflight::run_preflight_checks;
use steptrace::process_lookup::resolve_executable;
use steptrace::semantic_info::SemanticInfo;
use steptrace::testing::ReplayBackend;

// Exit codes (usage errors exit with 2 from clap itself)
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = TracerConfig::from(&args);
    let quiet = config.quiet;

    let debugger = args.replay.is_none().then_some(config.debugger.as_path());
    run_preflight_checks(&args.executable, debugger)?;
    let executable = resolve_executable(&args.executable)?;

    let semantic_info = match &args.semantic_info {
        Some(path) => SemanticInfo::load(path)?,
        None => SemanticInfo::default(),
    };
    if let Some(source) = &semantic_info.source_file {
        info!("Primary source: {}", source.display());
    }

    let target_source = semantic_info.source_file.as_deref();
    let filter = UserCodeFilter::new(target_source, config.filter_tables());

    let outcome = if let Some(script) = &args.replay {
        let mut backend = ReplayBackend::from_file(script)?;
        trace(&mut backend, &executable, &config, filter)?
    } else {
        let mut backend = GdbBackend::spawn(&config.gdb_options(target_source))
            .context("Failed to start the debugger")?;
        trace(&mut backend, &executable, &config, filter)?
    };

    if !quiet {
        print_summary(&outcome);
    }

    TraceExporter::new(outcome.document)
        .pretty(config.pretty)
        .export(io::stdout().lock())
        .context("Failed to write trace")?;

    Ok(())
}

fn trace<B: DebugBackend>(
    backend: &mut B,
    executable: &std::path::Path,
    config: &TracerConfig,
    filter: UserCodeFilter,
) -> Result<TraceOutcome> {
    if !config.quiet {
        eprintln!("tracing {}", executable.display());
    }
    let outcome = Session::new(backend, config, filter)
        .run(executable)
        .with_context(|| format!("Failed to trace {}", executable.display()))?;
    Ok(outcome)
}

fn print_summary(outcome: &TraceOutcome) {
    let report = &outcome.report;
    let ending = match report.end_reason {
        EndReason::Completed => "program finished",
        EndReason::StepLimit => "step limit reached",
        EndReason::Stuck { graceful: true } => "left user code",
        EndReason::Stuck { graceful: false } => "never reached user code",
        EndReason::Timeout => "timed out",
    };
    let pid = report.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
    eprintln!(
        "generated {} steps ({ending}) from {} stops in {:.2}s, {pid}, line info {:.0}%",
        outcome.document.total_steps,
        report.stop_events,
        report.elapsed.as_secs_f64(),
        report.debug_info_coverage,
    );
    if report.recorded_steps == 0 && report.debug_info_coverage < 50.0 {
        eprintln!("warning: no user code was recorded; compile the target with -g -O0");
    }
}
