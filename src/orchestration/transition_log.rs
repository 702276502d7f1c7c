use crate::orchestration::error::EngineError;
use crate::shared::fs_atomic::atomic_write_json;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_TRANSITION_LOG_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Transition,
    Invoke,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub ts: String,
    pub workflow: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
}

/// Append-only audit trail, newest entry last. Once the file holds more than `cap`
/// entries the oldest are dropped in the same atomic write as the append.
#[derive(Debug, Clone)]
pub struct TransitionLog {
    path: PathBuf,
    cap: usize,
}

impl TransitionLog {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn entries(&self) -> Result<Vec<TransitionLogEntry>, EngineError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(EngineError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|source| EngineError::Json {
            path: self.path.display().to_string(),
            source,
        })
    }

    pub fn append(&self, entry: TransitionLogEntry) -> Result<(), EngineError> {
        let mut entries = self.entries()?;
        entries.push(entry);
        if entries.len() > self.cap {
            let overflow = entries.len() - self.cap;
            entries.drain(..overflow);
        }
        atomic_write_json(&self.path, &entries).map_err(|source| EngineError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    pub fn record(
        &self,
        kind: TransitionKind,
        workflow: &str,
        from: &str,
        to: &str,
        gate: Option<String>,
    ) -> Result<(), EngineError> {
        self.append(TransitionLogEntry {
            ts: chrono::Utc::now().to_rfc3339(),
            workflow: workflow.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            kind,
            gate,
        })
    }
}
