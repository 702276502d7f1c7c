use crate::orchestration::state::ExecutionStatus;
use crate::protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("no protocol state found at {path}")]
    MissingState { path: String },
    #[error("state validation failed for {path}: {reason}")]
    InvalidState { path: String, reason: String },
    #[error("state at {path} has depth {depth} but call stack length {call_stack_len}")]
    StateConsistency {
        path: String,
        depth: usize,
        call_stack_len: usize,
    },
    #[error("state field `{field}` is managed by the engine")]
    ReservedStateField { field: String },
    #[error("workflow `{workflow}` is not defined")]
    UnknownWorkflow { workflow: String },
    #[error("step `{step}` is not defined in workflow `{workflow}`")]
    UnknownStep { workflow: String, step: String },
    #[error("no transition `{from}` -> `{to}` declared in workflow `{workflow}`")]
    NoSuchTransition {
        workflow: String,
        from: String,
        to: String,
    },
    #[error("gate blocks transition `{from}` -> `{to}` in workflow `{workflow}`")]
    GateBlocked {
        workflow: String,
        from: String,
        to: String,
    },
    #[error("maximum nesting depth of {max_depth} exceeded")]
    MaxNestingDepthExceeded { max_depth: usize },
    #[error("resume step `{step}` does not exist in parent workflow `{workflow}`")]
    InvalidResumeStep { workflow: String, step: String },
    #[error("workflow is not nested; the call stack is empty")]
    NotNested,
    #[error("cannot halt from status `{status}`")]
    CannotHalt { status: ExecutionStatus },
    #[error("cannot resume from status `{status}`; engine is not halted")]
    NotHalted { status: ExecutionStatus },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError {
    /// Expected, recoverable outcomes of a single transition attempt. These are
    /// reported through a failed `TransitionResult` instead of failing the engine.
    pub fn is_transition_rejection(&self) -> bool {
        matches!(
            self,
            Self::NoSuchTransition { .. }
                | Self::GateBlocked { .. }
                | Self::MaxNestingDepthExceeded { .. }
                | Self::InvalidResumeStep { .. }
                | Self::UnknownWorkflow { .. }
        )
    }
}
