use steptrace::engine::{Session, TraceOutcome};
use steptrace::classification::{FilterTables, UserCodeFilter};
use steptrace::config::TracerConfig;
use steptrace::export::TraceExporter;
use steptrace::testing::ReplayBackend;
use std::path::{Path, PathBuf};

fn replay_fixture() -> TraceOutcome {
    let script = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/replay_point.json");
    let mut backend = ReplayBackend::from_file(&script).expect("Failed to load replay script");
    let config = TracerConfig::default();
    let filter = UserCodeFilter::new(None, FilterTables::default());
    Session::new(&mut backend, &config, filter).run(Path::new("/tmp/point")).expect("Failed to trace")
}

#[test]
fn test_export_creates_valid_json() {
    let outcome = replay_fixture();

    let mut buffer = Vec::new();
    TraceExporter::new(outcome.document).export(&mut buffer).expect("Failed to export trace");

    // Verify the output is valid JSON
    let json_str = String::from_utf8(buffer).expect("Invalid UTF-8");
    let parsed: serde_json::Value = serde_json::from_str(&json_str).expect("Invalid JSON");

    // Verify it has the expected structure
    let steps = parsed["steps"].as_array().expect("steps array");
    assert_eq!(parsed["totalSteps"], steps.len());
    assert_eq!(steps.last().unwrap()["type"], "program_end");
    assert!(steps.last().unwrap()["state"]["callStack"].as_array().unwrap().is_empty());
}

#[test]
fn test_exported_step_fields() {
    let outcome = replay_fixture();
    let mut buffer = Vec::new();
    TraceExporter::new(outcome.document).export(&mut buffer).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

    let creation = &parsed["steps"][2];
    assert_eq!(creation["type"], "object_creation");
    assert_eq!(creation["className"], "Point");
    assert_eq!(creation["objectName"], "p");
    assert_eq!(creation["name"], "p");
    assert_eq!(creation["dataType"], "Point");
    assert_eq!(creation["primitive"], "class");
    assert_eq!(creation["address"], "0x7fffffffe0a0");
    assert_eq!(creation["scope"], "local");

    let frame = &creation["state"]["callStack"][0];
    assert_eq!(frame["function"], "main");
    assert_eq!(frame["file"], "point.cpp");
    assert_eq!(frame["line"], 15);

    let p = &frame["locals"]["p"];
    assert_eq!(p["type"], "Point");
    assert_eq!(p["isAlive"], true);
    assert_eq!(p["value"][0]["name"], "x");
    assert_eq!(p["value"][0]["value"], 3);
    assert_eq!(p["value"][1]["address"], "0x7fffffffe0a4");

    let declaration = &parsed["steps"][3];
    assert_eq!(declaration["type"], "variable_declaration");
    assert_eq!(declaration["name"], "scale");
    assert_eq!(declaration["value"], 1.5);
    assert_eq!(declaration["address"], "0x0");

    let pointer = &parsed["steps"][1];
    assert_eq!(pointer["type"], "pointer_declaration");
    assert_eq!(pointer["scope"], "argument");
    assert_eq!(pointer["value"], "0x7fffffffe0a0");
}
