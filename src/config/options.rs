use crate::orchestration::state_store::MAX_NESTING_DEPTH;
use crate::orchestration::transition_log::DEFAULT_TRANSITION_LOG_CAP;
use crate::protocol::ProtocolPaths;
use std::path::{Path, PathBuf};

pub const PROTOCOL_DIR_ENV: &str = "ARCANUM_PROTOCOL_DIR";
pub const STATE_DIR_ENV: &str = "ARCANUM_STATE_DIR";

/// Host-side knobs for an [`Engine`](crate::orchestration::Engine).
///
/// Directory overrides are resolved against the project directory when relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub protocol_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub max_nesting_depth: usize,
    pub transition_log_cap: usize,
    /// Write `logs/engine.log` under the state directory.
    pub diagnostics: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            protocol_dir: None,
            state_dir: None,
            max_nesting_depth: MAX_NESTING_DEPTH,
            transition_log_cap: DEFAULT_TRANSITION_LOG_CAP,
            diagnostics: true,
        }
    }
}

impl EngineOptions {
    /// Defaults plus directory overrides from `ARCANUM_PROTOCOL_DIR` and
    /// `ARCANUM_STATE_DIR`. Empty values are ignored.
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var_os(key)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };
        Self {
            protocol_dir: read(PROTOCOL_DIR_ENV),
            state_dir: read(STATE_DIR_ENV),
            ..Self::default()
        }
    }

    pub fn with_protocol_dir(mut self, protocol_dir: impl Into<PathBuf>) -> Self {
        self.protocol_dir = Some(protocol_dir.into());
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }

    pub fn with_max_nesting_depth(mut self, max_nesting_depth: usize) -> Self {
        self.max_nesting_depth = max_nesting_depth;
        self
    }

    pub fn with_transition_log_cap(mut self, transition_log_cap: usize) -> Self {
        self.transition_log_cap = transition_log_cap;
        self
    }

    pub fn without_diagnostics(mut self) -> Self {
        self.diagnostics = false;
        self
    }

    pub fn paths_for(&self, project_dir: &Path) -> ProtocolPaths {
        let mut paths = ProtocolPaths::for_project(project_dir);
        if let Some(protocol_dir) = &self.protocol_dir {
            paths = paths.with_protocol_dir(protocol_dir);
        }
        if let Some(state_dir) = &self.state_dir {
            paths = paths.with_state_dir(state_dir);
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_overrides_resolve_from_project_dir() {
        let options = EngineOptions::default()
            .with_protocol_dir("custom/protocol")
            .with_state_dir("/var/arcanum/state");
        let paths = options.paths_for(Path::new("/work/project"));
        assert_eq!(
            paths.protocol_dir,
            PathBuf::from("/work/project/custom/protocol")
        );
        assert_eq!(paths.state_dir, PathBuf::from("/var/arcanum/state"));
    }

    #[test]
    fn defaults_use_conventional_layout() {
        let options = EngineOptions::default();
        assert_eq!(options.max_nesting_depth, 10);
        assert_eq!(options.transition_log_cap, 1000);
        let paths = options.paths_for(Path::new("/p"));
        assert_eq!(paths.protocol_dir, PathBuf::from("/p/.opencode/protocol"));
        assert_eq!(paths.state_dir, PathBuf::from("/p/.opencode/state"));
    }
}
