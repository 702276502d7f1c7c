//! Trusted on-enter / on-exit hooks.
//!
//! Hooks are project code running with the engine's full privileges. There is no
//! sandbox: a snippet is trusted exactly as much as the protocol directory it lives
//! in. Hooks are resolved through [`HookRunner`] implementations, first the
//! in-process [`SnippetRegistry`], then script files under `snippets/`.

pub mod executor;
pub mod registry;
pub mod script;

pub use executor::{HookOutcome, SnippetExecutor};
pub use registry::SnippetRegistry;
pub use script::ScriptHookRunner;

use crate::orchestration::state::ProtocolState;
use crate::shared::logging::EngineLogger;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SnippetError {
    #[error("snippet `{hook_id}` not found")]
    NotFound { hook_id: String },
    #[error("snippet `{hook_id}` failed: {reason}")]
    Failed { hook_id: String, reason: String },
    #[error("snippet `{hook_id}` exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        hook_id: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("snippet `{hook_id}` produced no result")]
    MissingResult { hook_id: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookResult {
    Ok,
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Patch {
        patch: Map<String, Value>,
    },
    Transition {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl HookResult {
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort {
            reason: Some(reason.into()),
        }
    }

    /// Any value outside the four result shapes becomes an abort carrying the reason.
    pub fn from_value(value: Value) -> Self {
        let rendered = value.to_string();
        serde_json::from_value(value).unwrap_or_else(|err| {
            Self::abort(format!("invalid hook result `{rendered}`: {err}"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookMeta {
    pub workflow_id: String,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_to: Option<String>,
}

impl HookMeta {
    pub fn new(workflow_id: &str, step_id: &str, transition_to: Option<&str>) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
            transition_to: transition_to.map(str::to_string),
        }
    }
}

/// What a hook sees while it runs. The state is a read-only snapshot; changes are
/// requested through [`HookContext::set_state`] and applied by the engine afterwards.
pub struct HookContext<'a> {
    state: &'a ProtocolState,
    meta: HookMeta,
    project_dir: &'a Path,
    logger: &'a EngineLogger,
    patches: Map<String, Value>,
}

impl<'a> HookContext<'a> {
    pub fn new(
        state: &'a ProtocolState,
        meta: HookMeta,
        project_dir: &'a Path,
        logger: &'a EngineLogger,
    ) -> Self {
        Self {
            state,
            meta,
            project_dir,
            logger,
            patches: Map::new(),
        }
    }

    pub fn state(&self) -> &ProtocolState {
        self.state
    }

    pub fn meta(&self) -> &HookMeta {
        &self.meta
    }

    pub fn project_dir(&self) -> &Path {
        self.project_dir
    }

    pub fn set_state(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.patches.insert(key, value);
        }
    }

    pub fn log(&self, message: &str, data: Option<&Value>) {
        let message = format!(
            "[{}:{}] {message}",
            self.meta.workflow_id, self.meta.step_id
        );
        self.logger.append("info", "hook_log", &message, data);
    }

    pub fn patches(&self) -> &Map<String, Value> {
        &self.patches
    }

    pub(crate) fn into_patches(self) -> Map<String, Value> {
        self.patches
    }

    /// JSON document handed to script hooks on stdin.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "state": self.state.to_value(),
            "meta": self.meta,
            "projectDir": self.project_dir.display().to_string(),
        })
    }
}

/// Capability boundary between the engine and hook code.
pub trait HookRunner: Send + Sync {
    fn has_hook(&self, hook_id: &str) -> bool;

    fn execute(
        &self,
        hook_id: &str,
        ctx: &mut HookContext<'_>,
    ) -> Result<HookResult, SnippetError>;
}
