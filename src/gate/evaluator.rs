use super::expression::parse_condition;
use crate::protocol::GateDefinition;
use crate::shared::logging::EngineLogger;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Decides whether a transition guard currently holds.
///
/// `manual` gates never pass here; they are approved through a directed transition
/// request instead. Conditions outside the supported grammar evaluate to `false` and
/// leave a `gate_unrecognized` diagnostic in the engine log.
#[derive(Debug, Clone)]
pub struct GateEvaluator {
    project_dir: PathBuf,
    logger: EngineLogger,
}

impl GateEvaluator {
    pub fn new(project_dir: impl Into<PathBuf>, logger: EngineLogger) -> Self {
        Self {
            project_dir: project_dir.into(),
            logger,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// A missing gate always passes.
    pub fn passes(&self, gate: Option<&GateDefinition>, state: &Value) -> bool {
        gate.map(|gate| self.evaluate(gate, state)).unwrap_or(true)
    }

    pub fn evaluate(&self, gate: &GateDefinition, state: &Value) -> bool {
        match gate {
            GateDefinition::Manual { .. } => false,
            GateDefinition::Criteria { condition, .. } => self.evaluate_condition(condition, state),
            GateDefinition::Expression { expression, .. } => {
                self.evaluate_condition(expression, state)
            }
            GateDefinition::FileExists { path, .. } => self.resolve_path(path).exists(),
            GateDefinition::Status { field, value, .. } => state
                .get(field)
                .and_then(coerce_to_string)
                .is_some_and(|actual| actual == *value),
        }
    }

    pub fn evaluate_condition(&self, condition: &str, state: &Value) -> bool {
        match parse_condition(condition) {
            Ok(expr) => expr.evaluate(state),
            Err(err) => {
                self.logger.append(
                    "warn",
                    "gate_unrecognized",
                    &format!("condition evaluated as false: {err}"),
                    Some(&serde_json::json!({ "condition": condition })),
                );
                false
            }
        }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}
