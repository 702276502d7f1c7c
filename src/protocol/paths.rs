use std::path::{Path, PathBuf};

pub const PROTOCOL_DIR: &str = ".opencode/protocol";
pub const STATE_DIR: &str = ".opencode/state";
pub const INDEX_FILE_NAMES: [&str; 2] = ["index.yaml", "index.yml"];
pub const WORKFLOWS_DIR: &str = "workflows";
pub const AGENTS_DIR: &str = "agents";
pub const RULES_DIR: &str = "rules";
pub const SNIPPETS_DIR: &str = "snippets";
pub const SINGLE_STATE_FILE_NAME: &str = "current.json";
pub const MULTI_STATE_FILE_NAME: &str = "workflow.json";
pub const TRANSITION_LOG_FILE_NAME: &str = "transitions.log.json";

pub const DOCUMENT_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Resolved on-disk locations for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolPaths {
    pub project_dir: PathBuf,
    pub protocol_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ProtocolPaths {
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            protocol_dir: project_dir.join(PROTOCOL_DIR),
            state_dir: project_dir.join(STATE_DIR),
            project_dir,
        }
    }

    pub fn with_protocol_dir(mut self, protocol_dir: impl Into<PathBuf>) -> Self {
        self.protocol_dir = self.resolve_in_project(protocol_dir.into());
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = self.resolve_in_project(state_dir.into());
        self
    }

    /// First existing index file, if any.
    pub fn index_file(&self) -> Option<PathBuf> {
        INDEX_FILE_NAMES
            .iter()
            .map(|name| self.protocol_dir.join(name))
            .find(|path| path.is_file())
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.protocol_dir.join(WORKFLOWS_DIR)
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.protocol_dir.join(AGENTS_DIR)
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.protocol_dir.join(RULES_DIR)
    }

    pub fn snippets_dir(&self) -> PathBuf {
        self.protocol_dir.join(SNIPPETS_DIR)
    }

    pub fn transition_log_path(&self) -> PathBuf {
        self.state_dir.join(TRANSITION_LOG_FILE_NAME)
    }

    /// Relative paths are taken from the project root; absolute paths pass through.
    pub fn resolve_in_project(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

pub fn is_document_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}
