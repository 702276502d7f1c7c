use crate::orchestration::error::EngineError;
use crate::orchestration::state::{
    CallStackEntry, ExecutionStatus, NestedInvocation, ProtocolState, CHILD_RETURN_MARKER,
    NESTED_RESULT_FIELD, RESERVED_STATE_FIELDS,
};
use crate::protocol::paths::{MULTI_STATE_FILE_NAME, SINGLE_STATE_FILE_NAME};
use crate::protocol::StateFormat;
use crate::shared::fs_atomic::atomic_write_json;
use crate::shared::serde_ext::merge_shallow;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const MAX_NESTING_DEPTH: usize = 10;

/// Owns the on-disk `ProtocolState` document.
///
/// Every mutating operation is a read-modify-write against the file: the document on
/// disk is the only copy of the state, and every write goes through the atomic
/// temp-file + rename path.
#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
    format: StateFormat,
    max_depth: usize,
}

impl StateManager {
    pub fn new(state_dir: impl Into<PathBuf>, format: StateFormat) -> Self {
        Self {
            state_dir: state_dir.into(),
            format,
            max_depth: MAX_NESTING_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    // Multi format is reserved for per-concern files; today it holds the same single
    // document under a different name.
    pub fn state_path(&self) -> PathBuf {
        match self.format {
            StateFormat::Single => self.state_dir.join(SINGLE_STATE_FILE_NAME),
            StateFormat::Multi => self.state_dir.join(MULTI_STATE_FILE_NAME),
        }
    }

    pub fn load(&self) -> Result<Option<ProtocolState>, EngineError> {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };
        let state: ProtocolState =
            serde_json::from_str(&raw).map_err(|source| json_error(&path, source))?;
        validate_state(&state, &path)?;
        Ok(Some(state))
    }

    pub fn load_required(&self) -> Result<ProtocolState, EngineError> {
        self.load()?.ok_or_else(|| EngineError::MissingState {
            path: self.state_path().display().to_string(),
        })
    }

    pub fn save(&self, state: &mut ProtocolState) -> Result<(), EngineError> {
        let path = self.state_path();
        state.updated_at = chrono::Utc::now().to_rfc3339();
        validate_state(state, &path)?;
        atomic_write_json(&path, state).map_err(|source| io_error(&path, source))
    }

    pub fn initialize(
        &self,
        workflow: &str,
        initial_step: &str,
    ) -> Result<ProtocolState, EngineError> {
        let mut state = ProtocolState::new(workflow, initial_step);
        self.save(&mut state)?;
        Ok(state)
    }

    /// Loads, applies `change`, saves. Nothing is written when `change` fails.
    pub fn modify<F>(&self, change: F) -> Result<ProtocolState, EngineError>
    where
        F: FnOnce(&mut ProtocolState) -> Result<(), EngineError>,
    {
        let mut state = self.load_required()?;
        change(&mut state)?;
        self.save(&mut state)?;
        Ok(state)
    }

    pub fn set_status(&self, status: ExecutionStatus) -> Result<ProtocolState, EngineError> {
        self.modify(|state| {
            state.status = status;
            Ok(())
        })
    }

    pub fn set_step(
        &self,
        step: &str,
        status: ExecutionStatus,
    ) -> Result<ProtocolState, EngineError> {
        self.modify(|state| {
            state.step = step.to_string();
            state.status = status;
            Ok(())
        })
    }

    /// Merges caller fields into the passthrough bag. `status` may be patched with a
    /// valid status value; the other engine-owned fields are rejected.
    pub fn update(&self, patch: &Map<String, Value>) -> Result<ProtocolState, EngineError> {
        if let Some(field) = patch
            .keys()
            .find(|key| RESERVED_STATE_FIELDS.contains(&key.as_str()))
        {
            return Err(EngineError::ReservedStateField {
                field: field.clone(),
            });
        }
        let path = self.state_path();
        self.modify(|state| {
            let mut patch = patch.clone();
            if let Some(status) = patch.remove("status") {
                let raw = status.as_str().unwrap_or_default();
                state.status =
                    ExecutionStatus::parse(raw).map_err(|reason| EngineError::InvalidState {
                        path: path.display().to_string(),
                        reason,
                    })?;
            }
            merge_shallow(&mut state.extra, &patch);
            Ok(())
        })
    }

    pub fn clear_child_marker(&self) -> Result<ProtocolState, EngineError> {
        self.modify(|state| {
            state.extra.remove(CHILD_RETURN_MARKER);
            Ok(())
        })
    }

    /// Pushes the current position onto the call stack and switches to the child.
    /// Fails without touching the file once the stack would exceed the depth bound.
    pub fn invoke_child(
        &self,
        child_workflow: &str,
        child_initial_step: &str,
        input: Map<String, Value>,
        resume_step: Option<String>,
        output_mapping: BTreeMap<String, String>,
    ) -> Result<ProtocolState, EngineError> {
        let max_depth = self.max_depth;
        self.modify(|state| {
            if state.call_stack.len() >= max_depth {
                return Err(EngineError::MaxNestingDepthExceeded { max_depth });
            }
            state.call_stack.push(CallStackEntry {
                workflow: state.workflow.clone(),
                step: state.step.clone(),
                resume_to: resume_step,
                output: output_mapping,
            });
            state.depth += 1;
            state.workflow = child_workflow.to_string();
            state.step = child_initial_step.to_string();
            state.nested = Some(NestedInvocation {
                workflow: child_workflow.to_string(),
                step: child_initial_step.to_string(),
                input,
                depth: state.depth,
            });
            Ok(())
        })
    }

    /// Pops the top call-stack entry and restores the parent. `result` lands in the
    /// passthrough bag; the child's own `nested_result` field is consumed.
    pub fn return_to_parent(
        &self,
        result: Map<String, Value>,
    ) -> Result<ProtocolState, EngineError> {
        self.modify(|state| {
            let entry = state.call_stack.pop().ok_or(EngineError::NotNested)?;
            let child_workflow = std::mem::replace(&mut state.workflow, entry.workflow.clone());
            state.extra.remove(NESTED_RESULT_FIELD);
            merge_shallow(&mut state.extra, &result);
            state
                .extra
                .insert(CHILD_RETURN_MARKER.to_string(), Value::String(child_workflow));
            state.step = entry.resume_step().to_string();
            state.depth = state.depth.saturating_sub(1);
            state.nested = None;
            Ok(())
        })
    }
}

fn validate_state(state: &ProtocolState, path: &Path) -> Result<(), EngineError> {
    if state.depth != state.call_stack.len() {
        return Err(EngineError::StateConsistency {
            path: path.display().to_string(),
            depth: state.depth,
            call_stack_len: state.call_stack.len(),
        });
    }
    let invalid = |reason: String| EngineError::InvalidState {
        path: path.display().to_string(),
        reason,
    };
    if state.workflow.trim().is_empty() {
        return Err(invalid("`workflow` must be non-empty".to_string()));
    }
    if state.step.trim().is_empty() {
        return Err(invalid("`step` must be non-empty".to_string()));
    }
    for (index, entry) in state.call_stack.iter().enumerate() {
        if entry.workflow.trim().is_empty() || entry.step.trim().is_empty() {
            return Err(invalid(format!(
                "call stack entry {index} requires `workflow` and `step`"
            )));
        }
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> EngineError {
    EngineError::Json {
        path: path.display().to_string(),
        source,
    }
}
