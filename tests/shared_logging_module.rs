use arcanum::shared::logging::{engine_log_path, EngineLogger};
use serde_json::{json, Value};
use std::fs;
use tempfile::tempdir;

#[test]
fn shared_logging_module_writes_json_log_lines() {
    let temp = tempdir().expect("tempdir");
    let logger = EngineLogger::for_state_dir(temp.path());

    logger.info("transition", "main: plan -> build");
    logger.append("warn", "hook_abort", "snippet `guard` aborted", Some(&json!({ "reason": "no" })));

    let log = fs::read_to_string(engine_log_path(temp.path())).expect("read engine log");
    let lines: Vec<Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["level"], "info");
    assert_eq!(lines[0]["event"], "transition");
    assert_eq!(lines[0]["message"], "main: plan -> build");
    assert!(lines[0].get("data").is_none());
    assert!(lines[0]["timestamp"].as_str().is_some());
    assert_eq!(lines[1]["data"]["reason"], "no");
}

#[test]
fn shared_logging_module_disabled_logger_writes_nothing() {
    let temp = tempdir().expect("tempdir");
    let logger = EngineLogger::disabled();
    logger.error("initialize_failed", "boom");
    assert!(logger.path().is_none());
    assert!(fs::read_dir(temp.path()).expect("read dir").next().is_none());
}
