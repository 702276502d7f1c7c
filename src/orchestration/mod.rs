pub mod engine;
pub mod error;
pub mod fsm;
pub mod state;
pub mod state_store;
pub mod transition_log;

pub use engine::{Engine, EnginePhase, EngineStatus, LifecycleStatus, TransitionResult};
pub use error::EngineError;
pub use fsm::FsmExecutor;
pub use state::{
    CallStackEntry, ExecutionStatus, NestedInvocation, ProtocolState, CHILD_ABORTED_FIELD,
    CHILD_RETURN_MARKER, NESTED_RESULT_FIELD, RESERVED_STATE_FIELDS,
};
pub use state_store::{StateManager, MAX_NESTING_DEPTH};
pub use transition_log::{
    TransitionKind, TransitionLog, TransitionLogEntry, DEFAULT_TRANSITION_LOG_CAP,
};
