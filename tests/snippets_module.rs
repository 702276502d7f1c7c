use arcanum::orchestration::ProtocolState;
use arcanum::shared::logging::EngineLogger;
use arcanum::snippets::{
    HookMeta, HookResult, HookRunner, ScriptHookRunner, SnippetExecutor, SnippetRegistry,
};
use serde_json::{json, Map};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, tempdir_in};

fn executor(project_dir: &Path, registry: SnippetRegistry) -> SnippetExecutor {
    let registry: Arc<dyn HookRunner> = Arc::new(registry);
    let scripts: Arc<dyn HookRunner> = Arc::new(ScriptHookRunner::new(
        project_dir.join(".opencode/protocol/snippets"),
    ));
    SnippetExecutor::new(project_dir, EngineLogger::disabled())
        .with_runner(registry)
        .with_runner(scripts)
}

fn state() -> ProtocolState {
    let mut state = ProtocolState::new("main", "plan");
    state.extra.insert("tasks".to_string(), json!([{ "id": "t1" }]));
    state
}

#[test]
fn snippets_module_runs_registered_hook_with_context() {
    let temp = tempdir().expect("tempdir");
    let registry = SnippetRegistry::new().with("count_tasks", |ctx| {
        let count = ctx
            .state()
            .field("tasks")
            .and_then(|tasks| tasks.as_array())
            .map(|tasks| tasks.len())
            .unwrap_or(0);
        let mut patch = Map::new();
        patch.insert("task_count".to_string(), json!(count));
        patch.insert(
            "leaving_for".to_string(),
            json!(ctx.meta().transition_to.clone()),
        );
        ctx.set_state(patch);
        Ok(HookResult::Ok)
    });

    let outcome = executor(temp.path(), registry).run(
        "count_tasks",
        &state(),
        HookMeta::new("main", "plan", Some("build")),
    );
    assert_eq!(outcome.result, HookResult::Ok);
    assert_eq!(outcome.patches.get("task_count"), Some(&json!(1)));
    assert_eq!(outcome.patches.get("leaving_for"), Some(&json!("build")));
}

#[test]
fn snippets_module_merges_patch_results_after_context_patches() {
    let temp = tempdir().expect("tempdir");
    let registry = SnippetRegistry::new().with("patcher", |ctx| {
        let mut early = Map::new();
        early.insert("a".to_string(), json!(1));
        early.insert("b".to_string(), json!(1));
        ctx.set_state(early);
        let mut patch = Map::new();
        patch.insert("b".to_string(), json!(2));
        Ok(HookResult::Patch { patch })
    });

    let outcome = executor(temp.path(), registry).run(
        "patcher",
        &state(),
        HookMeta::new("main", "plan", None),
    );
    assert_eq!(outcome.patches.get("a"), Some(&json!(1)));
    assert_eq!(outcome.patches.get("b"), Some(&json!(2)));
}

#[test]
fn snippets_module_turns_failures_into_abort() {
    let temp = tempdir().expect("tempdir");
    let registry = SnippetRegistry::new().with("broken", |_ctx| Err("boom".to_string()));
    let executor = executor(temp.path(), registry);

    let outcome = executor.run("broken", &state(), HookMeta::new("main", "plan", None));
    assert!(outcome.is_abort());
    match outcome.result {
        HookResult::Abort { reason } => assert!(reason.expect("reason").contains("boom")),
        other => panic!("unexpected result: {other:?}"),
    }

    let missing = executor.run("absent", &state(), HookMeta::new("main", "plan", None));
    assert!(missing.is_abort());
}

#[test]
fn snippets_module_turns_panicking_hook_into_abort() {
    let temp = tempdir().expect("tempdir");
    let registry = SnippetRegistry::new().with("explodes", |_ctx| -> Result<HookResult, String> {
        panic!("hook blew up")
    });

    let outcome = executor(temp.path(), registry).run(
        "explodes",
        &state(),
        HookMeta::new("main", "plan", None),
    );
    match outcome.result {
        HookResult::Abort { reason } => {
            let reason = reason.expect("reason");
            assert!(reason.contains("panicked"));
            assert!(reason.contains("hook blew up"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn snippets_module_coerces_malformed_result_values_to_abort() {
    let result = HookResult::from_value(json!({ "type": "explode" }));
    match result {
        HookResult::Abort { reason } => {
            assert!(reason.expect("reason").contains("invalid hook result"))
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(
        HookResult::from_value(json!({ "type": "transition", "to": "done" })),
        HookResult::Transition {
            to: "done".to_string(),
            reason: None
        }
    );
}

#[test]
fn snippets_module_runs_shell_script_hooks() {
    let temp = tempdir().expect("tempdir");
    let snippets = temp.path().join(".opencode/protocol/snippets");
    fs::create_dir_all(&snippets).expect("mkdir");
    fs::write(
        snippets.join("announce.sh"),
        "#!/bin/sh\ncat > received.json\necho '{\"setState\":{\"announced\":true}}'\necho '{\"log\":\"hello\"}'\necho '{\"type\":\"ok\"}'\n",
    )
    .expect("write script");

    let outcome = executor(temp.path(), SnippetRegistry::new()).run(
        "announce",
        &state(),
        HookMeta::new("main", "plan", None),
    );
    assert_eq!(outcome.result, HookResult::Ok);
    assert_eq!(outcome.patches.get("announced"), Some(&json!(true)));

    let received: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("received.json")).expect("payload written"),
    )
    .expect("payload json");
    assert_eq!(received["meta"]["workflowId"], "main");
    assert_eq!(received["meta"]["stepId"], "plan");
    assert_eq!(received["state"]["tasks"][0]["id"], "t1");
}

#[test]
fn snippets_module_aborts_on_nonzero_exit_and_missing_result() {
    let temp = tempdir().expect("tempdir");
    let snippets = temp.path().join(".opencode/protocol/snippets");
    fs::create_dir_all(&snippets).expect("mkdir");
    fs::write(snippets.join("fails.sh"), "echo nope >&2\nexit 3\n").expect("write");
    fs::write(snippets.join("silent.sh"), "echo '{\"log\":\"no result\"}'\n").expect("write");
    let executor = executor(temp.path(), SnippetRegistry::new());

    let failed = executor.run("fails", &state(), HookMeta::new("main", "plan", None));
    match failed.result {
        HookResult::Abort { reason } => {
            let reason = reason.expect("reason");
            assert!(reason.contains("code 3"));
            assert!(reason.contains("nope"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let silent = executor.run("silent", &state(), HookMeta::new("main", "plan", None));
    assert!(silent.is_abort());
}

#[test]
fn snippets_module_prefers_registered_hooks_over_scripts() {
    let temp = tempdir().expect("tempdir");
    let snippets = temp.path().join(".opencode/protocol/snippets");
    fs::create_dir_all(&snippets).expect("mkdir");
    fs::write(snippets.join("gate.sh"), "exit 1\n").expect("write");
    let registry = SnippetRegistry::new().with("gate", |_ctx| Ok(HookResult::Ok));

    let outcome = executor(temp.path(), registry).run(
        "gate",
        &state(),
        HookMeta::new("main", "plan", None),
    );
    assert_eq!(outcome.result, HookResult::Ok);
}

#[test]
fn snippets_module_runs_scripts_for_relative_project_dir() {
    let temp = tempdir_in(".").expect("tempdir in working dir");
    let project_dir = temp.path();
    assert!(project_dir.is_relative());
    let snippets = project_dir.join(".opencode/protocol/snippets");
    fs::create_dir_all(&snippets).expect("mkdir");
    fs::write(
        snippets.join("hello.sh"),
        "cat > seen.json\necho '{\"type\":\"ok\"}'\n",
    )
    .expect("write script");

    let outcome = executor(project_dir, SnippetRegistry::new()).run(
        "hello",
        &state(),
        HookMeta::new("main", "plan", None),
    );
    assert_eq!(outcome.result, HookResult::Ok);
    assert!(project_dir.join("seen.json").is_file());
}
