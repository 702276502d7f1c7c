use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Passthrough field a child workflow fills with its result before reaching its
/// terminal step. Consumed when control returns to the parent.
pub const NESTED_RESULT_FIELD: &str = "nested_result";
/// One-shot marker written on return from a child; keeps the parent from
/// re-invoking the same child on the next tick.
pub const CHILD_RETURN_MARKER: &str = "_returned_from_child";
/// Merged into the parent state when a child is discarded by `abort_child`.
pub const CHILD_ABORTED_FIELD: &str = "child_aborted";

/// Top-level keys owned by the engine. Caller patches may not touch them.
pub const RESERVED_STATE_FIELDS: [&str; 6] = [
    "workflow",
    "step",
    "depth",
    "call_stack",
    "nested",
    "updated_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Waiting,
    Halted,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Halted => "halted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "halted" => Ok(Self::Halted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(
                "status must be one of: running, waiting, halted, completed, failed".to_string(),
            ),
        }
    }

    pub fn can_halt(self) -> bool {
        matches!(self, Self::Running | Self::Waiting)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A paused parent workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStackEntry {
    pub workflow: String,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_to: Option<String>,
    /// Child result path -> parent state key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<String, String>,
}

impl CallStackEntry {
    pub fn resume_step(&self) -> &str {
        self.resume_to.as_deref().unwrap_or(&self.step)
    }
}

/// The child invocation currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedInvocation {
    pub workflow: String,
    pub step: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub workflow: String,
    pub step: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub call_stack: Vec<CallStackEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<NestedInvocation>,
    /// Caller-defined fields (`tasks`, `current_task_id`, ...) kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProtocolState {
    pub fn new(workflow: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            step: step.into(),
            status: ExecutionStatus::Running,
            updated_at: String::new(),
            depth: 0,
            call_stack: Vec::new(),
            nested: None,
            extra: Map::new(),
        }
    }

    pub fn is_nested(&self) -> bool {
        !self.call_stack.is_empty()
    }

    pub fn returned_from_child(&self) -> bool {
        self.extra.contains_key(CHILD_RETURN_MARKER)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// The whole state as one JSON object, the shape gates and hooks see.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
