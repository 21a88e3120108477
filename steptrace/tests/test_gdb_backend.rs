//! End-to-end sessions against a real GDB.
//!
//! Fixtures are compiled with the system C/C++ compiler. Tests return early
//! when `gdb` or the compiler is unavailable.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use steptrace::backend::gdb::{GdbBackend, GdbOptions};
use steptrace::backend::StepGranularity;
use steptrace::classification::{FilterTables, UserCodeFilter};
use steptrace::config::TracerConfig;
use steptrace::engine::{EndReason, Session, TraceOutcome};
use steptrace::process_lookup::is_process_running;
use steptrace_common::{SnapshotValue, StepKind, StructuralKind};

fn available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

/// Compile a fixture with `-g -O0` into `dir`, or `None` if tools are missing.
fn build(dir: &Path, source: &str) -> Option<PathBuf> {
    let compiler = if source.ends_with(".cpp") { "c++" } else { "cc" };
    if !available("gdb") || !available(compiler) {
        eprintln!("skipping: gdb or {compiler} not available");
        return None;
    }
    let output = dir.join(source.split('.').next().unwrap_or("prog"));
    let status = Command::new(compiler)
        .args(["-g", "-O0", "-o"])
        .arg(&output)
        .arg(fixture(source))
        .status()
        .ok()?;
    status.success().then_some(output)
}

fn trace(executable: &Path, source: &str, config: &TracerConfig) -> TraceOutcome {
    let mut backend = GdbBackend::spawn(&config.gdb_options(Some(&fixture(source)))).expect("spawn gdb");
    let filter = UserCodeFilter::new(Some(&fixture(source)), FilterTables::default());
    Session::new(&mut backend, config, filter).run(executable).expect("trace session")
}

#[test]
fn test_loop_program_trace() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), "loop.c") else { return };

    let outcome = trace(&exe, "loop.c", &TracerConfig::default());
    let doc = &outcome.document;

    assert!(
        matches!(outcome.report.end_reason, EndReason::Completed | EndReason::Stuck { graceful: true }),
        "{:?}",
        outcome.report
    );
    assert!(doc.steps.len() > 5);
    assert_eq!(doc.terminal_step().unwrap().kind, StepKind::ProgramEnd);
    for (index, step) in doc.steps.iter().enumerate() {
        assert_eq!(step.id, index);
    }

    let recorded = &doc.steps[..doc.steps.len() - 1];
    assert!(recorded.iter().all(|s| s.state.call_stack[0].file == "loop.c"));
    assert!(recorded.iter().all(|s| s.function.as_deref() == Some("main")));

    let last = recorded.last().unwrap();
    let locals = &last.state.call_stack[0].locals;
    assert_eq!(locals.get("total").map(|v| &v.value), Some(&SnapshotValue::Int(3)));

    let values = locals.get("values").unwrap();
    assert_eq!(values.kind, StructuralKind::Array);
    assert_eq!(values.value.children().unwrap().len(), 4);
    assert_eq!(locals.get("cursor").unwrap().kind, StructuralKind::Pointer);
    assert!(locals.get("total").unwrap().address.is_some());

    assert!(recorded.iter().any(|s| s.kind == StepKind::Assignment));
}

#[test]
fn test_cpp_object_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), "point.cpp") else { return };

    let config = TracerConfig { granularity: StepGranularity::Into, ..TracerConfig::default() };
    let outcome = trace(&exe, "point.cpp", &config);
    let kinds: Vec<StepKind> = outcome.document.steps.iter().map(|s| s.kind).collect();

    assert!(kinds.contains(&StepKind::ObjectCreation), "{kinds:?}");
    let p = outcome
        .document
        .steps
        .iter()
        .find_map(|s| s.state.call_stack.first()?.locals.get("p").filter(|p| p.kind == StructuralKind::Class))
        .expect("p snapshot");
    assert_eq!(p.class_name.as_deref(), Some("Point"));
    let members: Vec<&str> = p.value.children().unwrap().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(members, ["x", "y"]);
}

#[test]
fn test_global_constructor_runs_before_main() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), "global_point.cpp") else { return };

    let config = TracerConfig { granularity: StepGranularity::Into, ..TracerConfig::default() };
    let outcome = trace(&exe, "global_point.cpp", &config);
    let functions: Vec<&str> = outcome.document.steps.iter().filter_map(|s| s.function.as_deref()).collect();

    let ctor = functions.iter().position(|f| f.starts_with("Point::Point"));
    let main = functions.iter().position(|f| *f == "main");
    assert!(ctor.is_some() && main.is_some(), "{functions:?}");
    assert!(ctor < main, "constructor of the global must be recorded first: {functions:?}");
}

#[test]
fn test_infinite_loop_times_out_and_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), "spin.c") else { return };

    let config = TracerConfig {
        timeout: Duration::from_millis(1500),
        max_steps: 100_000,
        ..TracerConfig::default()
    };
    let outcome = trace(&exe, "spin.c", &config);

    assert_eq!(outcome.report.end_reason, EndReason::Timeout);
    assert_eq!(outcome.document.terminal_step().unwrap().kind, StepKind::Timeout);
    assert!(outcome.report.elapsed < Duration::from_secs(5), "{:?}", outcome.report.elapsed);
    let pid = outcome.report.pid.unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert!(!is_process_running(pid), "{pid} still running after the session");
}

#[test]
fn test_missing_executable_fails_target_creation() {
    if !available("gdb") {
        return;
    }
    let mut backend = GdbBackend::spawn(&GdbOptions::default()).unwrap();
    let config = TracerConfig::default();
    let filter = UserCodeFilter::new(None, FilterTables::default());

    let err = Session::new(&mut backend, &config, filter)
        .run(Path::new("/nonexistent/prog"))
        .unwrap_err();
    assert!(matches!(err, steptrace::domain::BackendError::TargetCreateFailed { .. }));
}
