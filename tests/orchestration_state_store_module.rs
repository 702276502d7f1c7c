use arcanum::orchestration::{
    EngineError, ExecutionStatus, StateManager, CHILD_RETURN_MARKER, NESTED_RESULT_FIELD,
};
use arcanum::protocol::StateFormat;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use tempfile::tempdir;

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object")
}

#[test]
fn state_store_module_round_trips_state_with_passthrough_fields() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Single);
    assert!(store.load().expect("load empty").is_none());

    store.initialize("main", "decompose").expect("initialize");
    store
        .update(&object(json!({ "tasks": [{ "id": "t1" }], "current_task_id": "t1" })))
        .expect("update");

    let loaded = store.load().expect("load").expect("state exists");
    assert_eq!(loaded.workflow, "main");
    assert_eq!(loaded.step, "decompose");
    assert_eq!(loaded.status, ExecutionStatus::Running);
    assert_eq!(loaded.depth, 0);
    assert!(!loaded.updated_at.is_empty());
    assert_eq!(loaded.field("current_task_id"), Some(&json!("t1")));
    assert_eq!(store.state_path(), temp.path().join("current.json"));

    let raw: Value =
        serde_json::from_str(&fs::read_to_string(store.state_path()).expect("read")).expect("json");
    assert_eq!(raw["tasks"][0]["id"], "t1");
}

#[test]
fn state_store_module_uses_workflow_json_for_multi_format() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Multi);
    store.initialize("main", "a").expect("initialize");
    assert!(temp.path().join("workflow.json").is_file());
    assert!(!temp.path().join("current.json").exists());
}

#[test]
fn state_store_module_rejects_depth_mismatch_on_load() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Single);
    fs::write(
        store.state_path(),
        r#"{"workflow":"main","step":"a","status":"running","depth":2,"call_stack":[]}"#,
    )
    .expect("write corrupt state");

    let err = store.load().expect_err("depth mismatch");
    assert!(matches!(
        err,
        EngineError::StateConsistency {
            depth: 2,
            call_stack_len: 0,
            ..
        }
    ));
}

#[test]
fn state_store_module_invokes_and_returns_repeatedly() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Single);
    store.initialize("main", "work").expect("initialize");

    for depth in 1..=4 {
        let state = store
            .invoke_child(
                &format!("child{depth}"),
                "start",
                object(json!({ "level": depth })),
                None,
                BTreeMap::new(),
            )
            .expect("invoke");
        assert_eq!(state.depth, depth);
        assert_eq!(state.call_stack.len(), depth);
        let nested = state.nested.expect("nested");
        assert_eq!(nested.input.get("level"), Some(&json!(depth)));
    }

    for depth in (0..4).rev() {
        let state = store
            .return_to_parent(object(json!({ "returned": depth })))
            .expect("return");
        assert_eq!(state.depth, depth);
        assert_eq!(state.call_stack.len(), depth);
        assert!(state.returned_from_child());
    }

    let state = store.load_required().expect("load");
    assert_eq!(state.workflow, "main");
    assert_eq!(state.step, "work");
    assert!(state.nested.is_none());
    assert_eq!(
        state.field(CHILD_RETURN_MARKER),
        Some(&json!("child1"))
    );
}

#[test]
fn state_store_module_resumes_at_declared_step_and_consumes_nested_result() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Single);
    store.initialize("main", "review").expect("initialize");
    store
        .invoke_child(
            "review",
            "check",
            Map::new(),
            Some("apply".to_string()),
            BTreeMap::new(),
        )
        .expect("invoke");
    store
        .update(&object(json!({ NESTED_RESULT_FIELD: { "ok": true } })))
        .expect("child writes result");

    let state = store
        .return_to_parent(object(json!({ "verdict": "pass" })))
        .expect("return");
    assert_eq!(state.step, "apply");
    assert_eq!(state.field("verdict"), Some(&json!("pass")));
    assert!(state.field(NESTED_RESULT_FIELD).is_none());
}

#[test]
fn state_store_module_refuses_to_exceed_max_depth_without_mutation() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Single).with_max_depth(2);
    store.initialize("main", "a").expect("initialize");
    for _ in 0..2 {
        store
            .invoke_child("child", "start", Map::new(), None, BTreeMap::new())
            .expect("invoke within bound");
    }
    let before = fs::read_to_string(store.state_path()).expect("read before");

    let err = store
        .invoke_child("child", "start", Map::new(), None, BTreeMap::new())
        .expect_err("depth bound");
    assert!(matches!(
        err,
        EngineError::MaxNestingDepthExceeded { max_depth: 2 }
    ));
    assert_eq!(
        fs::read_to_string(store.state_path()).expect("read after"),
        before
    );
}

#[test]
fn state_store_module_returns_not_nested_on_empty_stack() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Single);
    store.initialize("main", "a").expect("initialize");
    let err = store.return_to_parent(Map::new()).expect_err("not nested");
    assert!(matches!(err, EngineError::NotNested));
}

#[test]
fn state_store_module_guards_engine_owned_fields() {
    let temp = tempdir().expect("tempdir");
    let store = StateManager::new(temp.path(), StateFormat::Single);
    store.initialize("main", "a").expect("initialize");

    for field in ["workflow", "step", "depth", "call_stack", "nested", "updated_at"] {
        let err = store
            .update(&object(json!({ field: "x" })))
            .expect_err("reserved field");
        assert!(matches!(err, EngineError::ReservedStateField { .. }));
    }

    let err = store
        .update(&object(json!({ "status": "sleeping" })))
        .expect_err("invalid status");
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let state = store
        .update(&object(json!({ "status": "waiting" })))
        .expect("valid status");
    assert_eq!(state.status, ExecutionStatus::Waiting);
    assert!(state.field("status").is_none());
}
