use arcanum::gate::GateEvaluator;
use arcanum::protocol::GateDefinition;
use arcanum::shared::logging::EngineLogger;
use serde_json::json;
use std::fs;
use tempfile::tempdir;

fn status_gate(field: &str, value: &str) -> GateDefinition {
    GateDefinition::Status {
        field: field.to_string(),
        value: value.to_string(),
        description: None,
    }
}

#[test]
fn gate_evaluator_module_passes_missing_gate_and_blocks_manual() {
    let temp = tempdir().expect("tempdir");
    let gates = GateEvaluator::new(temp.path(), EngineLogger::disabled());
    let state = json!({});

    assert!(gates.passes(None, &state));
    assert!(!gates.passes(
        Some(&GateDefinition::Manual { description: None }),
        &state
    ));
}

#[test]
fn gate_evaluator_module_evaluates_criteria_against_state() {
    let temp = tempdir().expect("tempdir");
    let gates = GateEvaluator::new(temp.path(), EngineLogger::disabled());
    let gate = GateDefinition::criteria(
        "state.tasks.length > 0 && state.tasks.every(t => t.status === 'done')",
    );

    assert!(!gates.evaluate(&gate, &json!({ "tasks": [] })));
    assert!(!gates.evaluate(
        &gate,
        &json!({ "tasks": [{ "status": "done" }, { "status": "todo" }] })
    ));
    assert!(gates.evaluate(
        &gate,
        &json!({ "tasks": [{ "status": "done" }, { "status": "done" }] })
    ));
}

#[test]
fn gate_evaluator_module_checks_files_relative_to_project() {
    let temp = tempdir().expect("tempdir");
    let gates = GateEvaluator::new(temp.path(), EngineLogger::disabled());
    let gate = GateDefinition::FileExists {
        path: "docs/PLAN.md".to_string(),
        description: None,
    };

    assert!(!gates.evaluate(&gate, &json!({})));
    fs::create_dir_all(temp.path().join("docs")).expect("mkdir");
    fs::write(temp.path().join("docs/PLAN.md"), "plan").expect("write plan");
    assert!(gates.evaluate(&gate, &json!({})));
}

#[test]
fn gate_evaluator_module_compares_status_fields_as_strings() {
    let temp = tempdir().expect("tempdir");
    let gates = GateEvaluator::new(temp.path(), EngineLogger::disabled());

    assert!(gates.evaluate(&status_gate("review", "approved"), &json!({ "review": "approved" })));
    assert!(gates.evaluate(&status_gate("attempts", "3"), &json!({ "attempts": 3 })));
    assert!(gates.evaluate(&status_gate("ready", "true"), &json!({ "ready": true })));
    assert!(!gates.evaluate(&status_gate("review", "approved"), &json!({})));
}

#[test]
fn gate_evaluator_module_logs_unrecognized_conditions_as_false() {
    let temp = tempdir().expect("tempdir");
    let log_path = temp.path().join("logs/engine.log");
    let gates = GateEvaluator::new(temp.path(), EngineLogger::new(&log_path));

    let gate = GateDefinition::criteria("require('fs').existsSync('x')");
    assert!(!gates.evaluate(&gate, &json!({})));

    let log = fs::read_to_string(&log_path).expect("read log");
    let line: serde_json::Value =
        serde_json::from_str(log.lines().next().expect("one line")).expect("json line");
    assert_eq!(line["event"], "gate_unrecognized");
    assert_eq!(line["level"], "warn");
    assert_eq!(line["data"]["condition"], "require('fs').existsSync('x')");
}
