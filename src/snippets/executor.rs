use super::{HookContext, HookMeta, HookResult, HookRunner, SnippetError};
use crate::orchestration::state::ProtocolState;
use crate::shared::logging::EngineLogger;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of one hook run: the typed result plus every state patch the hook asked
/// for, in order (context `set_state` calls first, then a `patch` result).
#[derive(Debug, Clone, PartialEq)]
pub struct HookOutcome {
    pub result: HookResult,
    pub patches: Map<String, Value>,
}

impl HookOutcome {
    pub fn is_abort(&self) -> bool {
        matches!(self.result, HookResult::Abort { .. })
    }
}

/// Resolves a hook id against its runners and runs it. Never fails: errors raised
/// by hook code turn into an `abort` result so one broken hook blocks only the
/// transition it guards.
#[derive(Clone)]
pub struct SnippetExecutor {
    runners: Vec<Arc<dyn HookRunner>>,
    project_dir: PathBuf,
    logger: EngineLogger,
}

impl SnippetExecutor {
    pub fn new(project_dir: impl Into<PathBuf>, logger: EngineLogger) -> Self {
        Self {
            runners: Vec::new(),
            project_dir: project_dir.into(),
            logger,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn HookRunner>) -> Self {
        self.runners.push(runner);
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn run(&self, hook_id: &str, state: &ProtocolState, meta: HookMeta) -> HookOutcome {
        let mut ctx = HookContext::new(state, meta, &self.project_dir, &self.logger);
        let executed = match self.runners.iter().find(|runner| runner.has_hook(hook_id)) {
            Some(runner) => runner.execute(hook_id, &mut ctx),
            None => Err(SnippetError::NotFound {
                hook_id: hook_id.to_string(),
            }),
        };
        let mut patches = ctx.into_patches();

        let result = match executed {
            Ok(HookResult::Patch { patch }) => {
                for (key, value) in &patch {
                    patches.insert(key.clone(), value.clone());
                }
                HookResult::Patch { patch }
            }
            Ok(result) => result,
            Err(err) => HookResult::abort(err.to_string()),
        };

        if let HookResult::Abort { reason } = &result {
            self.logger.append(
                "warn",
                "hook_abort",
                &format!("snippet `{hook_id}` aborted"),
                Some(&serde_json::json!({ "reason": reason })),
            );
        }
        HookOutcome { result, patches }
    }
}

impl std::fmt::Debug for SnippetExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnippetExecutor")
            .field("runners", &self.runners.len())
            .field("project_dir", &self.project_dir)
            .finish()
    }
}
