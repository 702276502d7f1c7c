use super::{HookContext, HookResult, HookRunner, SnippetError};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type HookFn = dyn Fn(&mut HookContext<'_>) -> Result<HookResult, String> + Send + Sync;

/// In-process hooks registered by the host.
#[derive(Clone, Default)]
pub struct SnippetRegistry {
    hooks: BTreeMap<String, Arc<HookFn>>,
}

impl SnippetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, hook_id: impl Into<String>, hook: F)
    where
        F: Fn(&mut HookContext<'_>) -> Result<HookResult, String> + Send + Sync + 'static,
    {
        self.hooks.insert(hook_id.into(), Arc::new(hook));
    }

    pub fn with<F>(mut self, hook_id: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<HookResult, String> + Send + Sync + 'static,
    {
        self.register(hook_id, hook);
        self
    }

    pub fn hook_ids(&self) -> Vec<String> {
        self.hooks.keys().cloned().collect()
    }
}

impl std::fmt::Debug for SnippetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnippetRegistry")
            .field("hooks", &self.hook_ids())
            .finish()
    }
}

impl HookRunner for SnippetRegistry {
    fn has_hook(&self, hook_id: &str) -> bool {
        self.hooks.contains_key(hook_id)
    }

    fn execute(
        &self,
        hook_id: &str,
        ctx: &mut HookContext<'_>,
    ) -> Result<HookResult, SnippetError> {
        let hook = self
            .hooks
            .get(hook_id)
            .ok_or_else(|| SnippetError::NotFound {
                hook_id: hook_id.to_string(),
            })?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(ctx)))
            .unwrap_or_else(|payload| Err(format!("panicked: {}", panic_message(&*payload))));
        outcome.map_err(|reason| SnippetError::Failed {
            hook_id: hook_id.to_string(),
            reason,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "unknown panic".to_string())
}
