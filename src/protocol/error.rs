#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol index not found in {path} (expected index.yaml or index.yml)")]
    ProtocolNotFound { path: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("schema validation failed for {path}: {reason}")]
    SchemaValidation { path: String, reason: String },
    #[error("default workflow `{workflow}` not found; available workflows: [{}]", available.join(", "))]
    UnknownDefaultWorkflow {
        workflow: String,
        available: Vec<String>,
    },
}

impl ProtocolError {
    pub(crate) fn schema(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
