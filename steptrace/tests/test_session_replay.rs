//! Session driver behavior against scripted backends.

use std::path::Path;
use std::time::{Duration, Instant};

use steptrace::classification::{FilterTables, UserCodeFilter};
use steptrace::config::TracerConfig;
use steptrace::domain::BackendError;
use steptrace::engine::{EndReason, Session, TraceOutcome};
use steptrace::testing::{ReplayBackend, ReplayScript, ReplayStop, ReplayVariable};
use steptrace_common::{SnapshotValue, StepKind, StructuralKind, MAX_ARRAY_ELEMENTS};

const MAIN_C: &str = "/home/dev/project/main.cpp";

fn trace(backend: &mut ReplayBackend, config: &TracerConfig) -> TraceOutcome {
    let filter = UserCodeFilter::new(None, FilterTables::default());
    Session::new(backend, config, filter).run(Path::new("/tmp/prog")).unwrap()
}

fn at(line: u32) -> ReplayStop {
    ReplayStop::at("main", MAIN_C, line)
}

fn startup() -> Vec<ReplayStop> {
    vec![
        ReplayStop::without_line_info("_start"),
        ReplayStop::at("__libc_start_main", "/build/glibc/csu/libc-start.c", 332),
    ]
}

fn point(name: &str, x: &str, y: &str) -> ReplayVariable {
    ReplayVariable::aggregate(
        name,
        "Point",
        vec![
            ReplayVariable::scalar("x", "int", x).with_address(0x7ffd_0010),
            ReplayVariable::scalar("y", "int", y).with_address(0x7ffd_0014),
        ],
    )
    .with_address(0x7ffd_0010)
}

fn kinds(outcome: &TraceOutcome) -> Vec<StepKind> {
    outcome.document.steps.iter().map(|s| s.kind).collect()
}

#[test]
fn test_only_user_code_is_recorded() {
    let mut stops = startup();
    stops.extend([at(4), ReplayStop::at("printf", "/usr/include/stdio.h", 10), at(5)]);
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));

    let outcome = trace(&mut backend, &TracerConfig::default());

    let recorded: Vec<&str> = outcome.document.steps[..outcome.document.steps.len() - 1]
        .iter()
        .map(|s| s.state.call_stack[0].file.as_str())
        .collect();
    assert_eq!(recorded, ["main.cpp", "main.cpp"]);
    assert_eq!(outcome.report.stop_events, 5);
}

#[test]
fn test_consecutive_identical_stops_collapse() {
    let stops = vec![at(3), at(3), at(3), at(4), at(4), at(3)];
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));

    let outcome = trace(&mut backend, &TracerConfig::default());

    let lines: Vec<u32> = outcome.document.steps.iter().map(|s| s.line).collect();
    assert_eq!(lines, [3, 4, 3, 3]);
    assert_eq!(outcome.report.recorded_steps, 3);
}

#[test]
fn test_same_line_at_new_depth_is_recorded() {
    let stops = vec![
        ReplayStop::at("fact", MAIN_C, 2).with_depth(2),
        ReplayStop::at("fact", MAIN_C, 2).with_depth(3),
    ];
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));

    let outcome = trace(&mut backend, &TracerConfig::default());
    assert_eq!(outcome.report.recorded_steps, 2);
}

#[test]
fn test_ids_are_sequential_and_terminal_is_last() {
    let stops = (1..=6).map(at).collect();
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));

    let outcome = trace(&mut backend, &TracerConfig::default());
    let doc = &outcome.document;

    for (index, step) in doc.steps.iter().enumerate() {
        assert_eq!(step.id, index);
    }
    assert_eq!(doc.total_steps, doc.steps.len());
    assert_eq!(doc.steps.iter().filter(|s| s.kind.is_terminal()).count(), 1);
    assert_eq!(doc.terminal_step().unwrap().kind, StepKind::ProgramEnd);
}

#[test]
fn test_empty_script_still_produces_terminal_step() {
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(Vec::new()));

    let outcome = trace(&mut backend, &TracerConfig::default());

    assert_eq!(kinds(&outcome), [StepKind::ProgramEnd]);
    assert_eq!(outcome.document.steps[0].line, 0);
    assert_eq!(outcome.report.end_reason, EndReason::Completed);
}

#[test]
fn test_object_lifecycle_classification() {
    let mut stops = startup();
    stops.extend([
        at(10),
        ReplayStop::at("Point::Point(int, int)", MAIN_C, 4).with_depth(2),
        at(11).with_variables(vec![point("p", "1", "2")]),
        at(12).with_variables(vec![point("p", "5", "2")]),
        ReplayStop::at("Point::~Point()", MAIN_C, 6).with_depth(2),
    ]);
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));

    let outcome = trace(&mut backend, &TracerConfig::default());

    assert_eq!(
        kinds(&outcome),
        [
            StepKind::LineExecution,
            StepKind::ObjectCreation,
            StepKind::ObjectCreation,
            StepKind::Assignment,
            StepKind::ObjectDestruction,
            StepKind::ProgramEnd,
        ]
    );

    let steps = &outcome.document.steps;
    assert_eq!(steps[1].detail.class_name.as_deref(), Some("Point"));
    assert_eq!(steps[1].detail.object_name, None);
    assert_eq!(steps[2].detail.object_name.as_deref(), Some("p"));
    assert_eq!(steps[2].explanation, "Created Point object 'p'");
    assert_eq!(steps[3].detail.variable.as_deref(), Some("p"));
    assert_eq!(steps[4].detail.class_name.as_deref(), Some("Point"));

    let p = steps[2].state.call_stack[0].locals.get("p").unwrap();
    assert_eq!(p.kind, StructuralKind::Class);
    let members = p.value.children().unwrap();
    assert_eq!(members[0].value, SnapshotValue::Int(1));
    assert_eq!(members[1].address, Some(0x7ffd_0014));
}

#[test]
fn test_first_new_variable_wins_over_assignment() {
    let stops = vec![
        at(2).with_variables(vec![ReplayVariable::scalar("a", "int", "1")]),
        at(3).with_variables(vec![
            ReplayVariable::scalar("a", "int", "2"),
            ReplayVariable::scalar("ptr", "int *", "0x7ffd0000"),
        ]),
    ];
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));

    let outcome = trace(&mut backend, &TracerConfig::default());

    assert_eq!(outcome.document.steps[1].kind, StepKind::PointerDeclaration);
    assert_eq!(outcome.document.steps[1].detail.variable.as_deref(), Some("ptr"));
}

#[test]
fn test_large_array_is_truncated() {
    let elements = (0..250).map(|i| ReplayVariable::scalar("", "int", &i.to_string())).collect();
    let stops = vec![at(7).with_variables(vec![ReplayVariable::array("big", "int [250]", elements)])];
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));

    let outcome = trace(&mut backend, &TracerConfig::default());

    let step = &outcome.document.steps[0];
    assert_eq!(step.kind, StepKind::ArrayDeclaration);
    let big = step.state.call_stack[0].locals.get("big").unwrap();
    let items = big.value.children().unwrap();
    assert_eq!(items.len(), MAX_ARRAY_ELEMENTS);
    assert_eq!(items[99].name, "[99]");
    assert_eq!(items[99].value, SnapshotValue::Int(99));
}

#[test]
fn test_stuck_after_user_code_is_graceful() {
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![
        at(3),
        ReplayStop::without_line_info("__run_exit_handlers"),
    ]))
    .looping();
    let config = TracerConfig { stuck_threshold: 20, ..TracerConfig::default() };

    let outcome = trace(&mut backend, &config);

    // the loop returns to line 3 every other stop, so only the first visit records
    assert_eq!(outcome.report.end_reason, EndReason::Stuck { graceful: true });
    assert_eq!(kinds(&outcome), [StepKind::LineExecution, StepKind::ProgramEnd]);
    assert!(backend.was_killed());
}

#[test]
fn test_never_reaching_user_code() {
    let mut backend =
        ReplayBackend::new(ReplayScript::from_stops(vec![ReplayStop::without_line_info("poll")])).looping();
    let config = TracerConfig { stuck_threshold: 50, ..TracerConfig::default() };

    let outcome = trace(&mut backend, &config);

    assert_eq!(outcome.report.end_reason, EndReason::Stuck { graceful: false });
    assert_eq!(kinds(&outcome), [StepKind::ProgramEnd]);
    assert!(outcome.document.steps[0].explanation.contains("no user code"));
}

#[test]
fn test_timeout_interrupts_slow_step_and_kills_process() {
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![at(1), at(2)]))
        .looping()
        .with_step_delay(Duration::from_secs(60));
    let config = TracerConfig { timeout: Duration::from_millis(200), ..TracerConfig::default() };

    let started = Instant::now();
    let outcome = trace(&mut backend, &config);

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.report.end_reason, EndReason::Timeout);
    assert_eq!(outcome.document.terminal_step().unwrap().kind, StepKind::Timeout);
    assert!(backend.was_killed());
    assert!(!backend.is_process_alive());
}

#[test]
fn test_step_into_granularity_is_forwarded() {
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![at(1), at(2)]));
    let config = TracerConfig {
        granularity: steptrace::backend::StepGranularity::Into,
        ..TracerConfig::default()
    };

    trace(&mut backend, &config);

    assert!(backend
        .granularities()
        .iter()
        .all(|g| *g == steptrace::backend::StepGranularity::Into));
    assert_eq!(backend.steps_taken(), 2);
}

#[test]
fn test_rerun_produces_identical_document() {
    let script = ReplayScript::from_stops(vec![
        at(2).with_variables(vec![ReplayVariable::scalar("n", "int", "3")]),
        at(3).with_variables(vec![ReplayVariable::scalar("n", "int", "4")]),
    ]);

    let first = trace(&mut ReplayBackend::new(script.clone()), &TracerConfig::default());
    let second = trace(&mut ReplayBackend::new(script), &TracerConfig::default());

    assert_eq!(first.document, second.document);
}

#[test]
fn test_target_creation_failure_is_fatal() {
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![at(1)])).failing_target("not an ELF file");
    let filter = UserCodeFilter::new(None, FilterTables::default());
    let config = TracerConfig::default();

    let err = Session::new(&mut backend, &config, filter).run(Path::new("/tmp/prog")).unwrap_err();

    assert!(matches!(err, BackendError::TargetCreateFailed { .. }));
    assert!(!backend.is_process_alive());
}

#[test]
fn test_launch_failure_is_fatal() {
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![at(1)])).failing_launch("permission denied");
    let filter = UserCodeFilter::new(None, FilterTables::default());
    let config = TracerConfig::default();

    let err = Session::new(&mut backend, &config, filter).run(Path::new("/tmp/prog")).unwrap_err();

    assert!(matches!(err, BackendError::LaunchFailed(ref reason) if reason == "permission denied"));
}

#[test]
fn test_named_source_is_recorded_despite_unknown_extension() {
    let sketch = "/home/dev/project/blink.ino";
    let stops = vec![
        ReplayStop::at("setup", sketch, 8),
        ReplayStop::at("helper", "/home/dev/project/util.c", 3),
    ];
    let filter = UserCodeFilter::new(Some(Path::new(sketch)), FilterTables::default());
    let config = TracerConfig::default();

    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops.clone()));
    let outcome = Session::new(&mut backend, &config, filter).run(Path::new("/tmp/prog")).unwrap();
    let functions: Vec<_> = outcome.document.steps.iter().filter_map(|s| s.function.as_deref()).collect();
    assert_eq!(functions, ["setup", "helper"]);

    // without the semantic source the sketch is not recognizable as user code
    let mut backend = ReplayBackend::new(ReplayScript::from_stops(stops));
    let outcome = trace(&mut backend, &config);
    let functions: Vec<_> = outcome.document.steps.iter().filter_map(|s| s.function.as_deref()).collect();
    assert_eq!(functions, ["helper"]);
}
