use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn engine_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("logs/engine.log")
}

/// Best-effort JSON-lines diagnostics sink. Failures to write are swallowed so a
/// full disk or missing directory never blocks a transition.
#[derive(Debug, Clone, Default)]
pub struct EngineLogger {
    path: Option<PathBuf>,
}

impl EngineLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn for_state_dir(state_dir: &Path) -> Self {
        Self::new(engine_log_path(state_dir))
    }

    /// A logger that drops every line.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, message: &str) {
        self.append("info", event, message, None);
    }

    pub fn warn(&self, event: &str, message: &str) {
        self.append("warn", event, message, None);
    }

    pub fn error(&self, event: &str, message: &str) {
        self.append("error", event, message, None);
    }

    pub fn append(&self, level: &str, event: &str, message: &str, data: Option<&Value>) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        let mut payload = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": level,
            "event": event,
            "message": message,
        });
        if let (Some(data), Some(object)) = (data, payload.as_object_mut()) {
            object.insert("data".to_string(), data.clone());
        }

        let Ok(line) = serde_json::to_string(&payload) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}
