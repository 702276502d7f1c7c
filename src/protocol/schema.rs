//! Typed protocol documents.
//!
//! A protocol directory is made of one index, any number of workflow documents,
//! agent documents and opaque rule documents:
//!
//! ```yaml
//! # index.yaml
//! name: delivery
//! version: "1.0"
//! default_workflow: main
//! state:
//!   format: single
//! ```
//!
//! ```yaml
//! # workflows/main.yaml
//! id: main
//! steps:
//!   - id: decompose
//!     on_exit: record_plan
//!   - id: work_loop
//!   - id: done
//!     terminal: true
//! transitions:
//!   - from: decompose
//!     to: work_loop
//!     priority: 2
//!     gate: "state.tasks.length > 0"
//!   - from: decompose
//!     to: done
//!     priority: 1
//!     gate:
//!       type: criteria
//!       condition: "!state.tasks || state.tasks.length === 0"
//! ```

use crate::shared::ids::{AgentId, SnippetId, StepId, WorkflowId};
use crate::shared::serde_ext::parse_via_string;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateFormat {
    #[default]
    Single,
    Multi,
}

impl StateFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            _ => Err("state format must be one of: single, multi".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for StateFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "state format", Self::parse)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StateSettings {
    #[serde(default)]
    pub format: StateFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProtocolIndex {
    pub name: String,
    #[serde(deserialize_with = "deserialize_scalar_string")]
    pub version: String,
    pub default_workflow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub state: StateSettings,
}

impl ProtocolIndex {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("`name` must be non-empty".to_string());
        }
        if self.version.trim().is_empty() {
            return Err("`version` must be non-empty".to_string());
        }
        WorkflowId::parse(&self.default_workflow)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkflowDefinition {
    /// Falls back to the document's file stem when omitted.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_enter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke: Option<InvokeDefinition>,
}

impl StepDefinition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Sub-workflow call declared on a step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvokeDefinition {
    pub workflow: String,
    /// Child input key -> dot-path into the parent state.
    #[serde(default)]
    pub input: BTreeMap<String, String>,
    /// Dot-path into the child result -> parent state key.
    #[serde(default)]
    pub output: BTreeMap<String, String>,
    /// Parent step to resume at; defaults to the invoking step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransitionDefinition {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_gate",
        skip_serializing_if = "Option::is_none"
    )]
    pub gate: Option<GateDefinition>,
}

impl TransitionDefinition {
    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateDefinition {
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Criteria {
        #[serde(alias = "criteria")]
        condition: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Expression {
        #[serde(alias = "condition")]
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    FileExists {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Status {
        field: String,
        #[serde(deserialize_with = "deserialize_scalar_string")]
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl GateDefinition {
    pub fn criteria(condition: impl Into<String>) -> Self {
        Self::Criteria {
            condition: condition.into(),
            description: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manual { .. } => "manual",
            Self::Criteria { .. } => "criteria",
            Self::Expression { .. } => "expression",
            Self::FileExists { .. } => "file_exists",
            Self::Status { .. } => "status",
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }

    /// Short human-readable label recorded in the transition log.
    pub fn describe(&self) -> String {
        let description = match self {
            Self::Manual { description }
            | Self::Criteria { description, .. }
            | Self::Expression { description, .. }
            | Self::FileExists { description, .. }
            | Self::Status { description, .. } => description.as_ref(),
        };
        if let Some(description) = description {
            return description.clone();
        }
        match self {
            Self::Manual { .. } => "manual".to_string(),
            Self::Criteria { condition, .. } => condition.clone(),
            Self::Expression { expression, .. } => expression.clone(),
            Self::FileExists { path, .. } => format!("file_exists:{path}"),
            Self::Status { field, value, .. } => format!("status:{field}={value}"),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Manual { .. } => Ok(()),
            Self::Criteria { condition, .. } if condition.trim().is_empty() => {
                Err("criteria gate requires non-empty `condition`".to_string())
            }
            Self::Expression { expression, .. } if expression.trim().is_empty() => {
                Err("expression gate requires non-empty `expression`".to_string())
            }
            Self::FileExists { path, .. } if path.trim().is_empty() => {
                Err("file_exists gate requires non-empty `path`".to_string())
            }
            Self::Status { field, .. } if field.trim().is_empty() => {
                Err("status gate requires non-empty `field`".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn deserialize_gate<'de, D>(deserializer: D) -> Result<Option<GateDefinition>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match raw {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(condition)) => Ok(Some(GateDefinition::criteria(condition))),
        Some(other) => serde_yaml::from_value(other)
            .map(Some)
            .map_err(|err| D::Error::custom(format!("invalid gate: {err}"))),
    }
}

fn deserialize_scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(value) => Ok(value),
        serde_yaml::Value::Number(value) => Ok(value.to_string()),
        serde_yaml::Value::Bool(value) => Ok(value.to_string()),
        _ => Err(D::Error::custom("expected a string, number or boolean")),
    }
}

impl WorkflowDefinition {
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    pub fn has_step(&self, step_id: &str) -> bool {
        self.step(step_id).is_some()
    }

    pub fn initial_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    pub fn transitions_from<'a>(
        &'a self,
        step_id: &'a str,
    ) -> impl Iterator<Item = &'a TransitionDefinition> + 'a {
        self.transitions.iter().filter(move |t| t.from == step_id)
    }

    /// Structural checks that only need this document.
    pub fn validate(&self) -> Result<(), String> {
        WorkflowId::parse(&self.id)?;
        if self.steps.is_empty() {
            return Err(format!("workflow `{}` requires at least one step", self.id));
        }

        let mut step_ids = HashSet::new();
        for step in &self.steps {
            StepId::parse(&step.id)?;
            if !step_ids.insert(step.id.as_str()) {
                return Err(format!(
                    "workflow `{}` contains duplicate step id `{}`",
                    self.id, step.id
                ));
            }
            for hook in [step.on_enter.as_ref(), step.on_exit.as_ref()]
                .into_iter()
                .flatten()
            {
                SnippetId::parse(hook)?;
            }
            if let Some(invoke) = step.invoke.as_ref() {
                WorkflowId::parse(&invoke.workflow)?;
            }
        }

        for step in &self.steps {
            if let Some(resume) = step.invoke.as_ref().and_then(|i| i.resume.as_ref()) {
                if !step_ids.contains(resume.as_str()) {
                    return Err(format!(
                        "workflow `{}` step `{}` resumes at unknown step `{resume}`",
                        self.id, step.id
                    ));
                }
            }
        }

        for transition in &self.transitions {
            for endpoint in [&transition.from, &transition.to] {
                if !step_ids.contains(endpoint.as_str()) {
                    return Err(format!(
                        "workflow `{}` transition `{}` -> `{}` references unknown step `{endpoint}`",
                        self.id, transition.from, transition.to
                    ));
                }
            }
            if let Some(gate) = transition.gate.as_ref() {
                gate.validate().map_err(|reason| {
                    format!(
                        "workflow `{}` transition `{}` -> `{}`: {reason}",
                        self.id, transition.from, transition.to
                    )
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    #[default]
    Append,
    Prepend,
    Replace,
    Patch,
}

impl PromptMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
            Self::Patch => "patch",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            "replace" => Ok(Self::Replace),
            "patch" => Ok(Self::Patch),
            _ => Err("mode must be one of: append, prepend, replace, patch".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for PromptMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "agent mode", Self::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPolicyKind {
    #[default]
    Inherit,
    Override,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelPolicy {
    #[serde(default)]
    pub policy: ModelPolicyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ModelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolsPolicyKind {
    #[default]
    Inherit,
    Add,
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolsPolicy {
    #[serde(default)]
    pub policy: ToolsPolicyKind,
    #[serde(default)]
    pub list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentDefinition {
    /// Falls back to the document's file stem when omitted.
    #[serde(default)]
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default)]
    pub mode: PromptMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: ModelPolicy,
    #[serde(default)]
    pub tools: ToolsPolicy,
    #[serde(default)]
    pub rules: Vec<String>,
}

impl AgentDefinition {
    pub fn validate(&self) -> Result<(), String> {
        AgentId::parse(&self.id)?;
        if self.description.trim().is_empty() {
            return Err(format!("agent `{}` requires non-empty `description`", self.id));
        }
        if self.model.policy == ModelPolicyKind::Override && self.model.config.is_none() {
            return Err(format!(
                "agent `{}` sets `model.policy: override` without `model.config`",
                self.id
            ));
        }
        if self.base.is_none() && self.prompt.is_none() {
            return Err(format!(
                "agent `{}` requires `prompt` when no `base` agent is declared",
                self.id
            ));
        }
        Ok(())
    }
}

/// Everything loaded from one protocol directory. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolDefinition {
    pub root: PathBuf,
    pub index: ProtocolIndex,
    pub workflows: BTreeMap<String, WorkflowDefinition>,
    pub agents: BTreeMap<String, AgentDefinition>,
    pub rules: BTreeMap<String, Value>,
}

impl ProtocolDefinition {
    pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(workflow_id)
    }

    pub fn default_workflow(&self) -> Option<&WorkflowDefinition> {
        self.workflow(&self.index.default_workflow)
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    pub fn state_format(&self) -> StateFormat {
        self.index.state.format
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentDefinition> {
        self.agents.get(agent_id)
    }

    pub fn rule(&self, rule_id: &str) -> Option<&Value> {
        self.rules.get(rule_id)
    }
}
