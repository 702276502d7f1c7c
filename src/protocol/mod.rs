pub mod error;
pub mod loader;
pub mod paths;
pub mod schema;

pub use error::ProtocolError;
pub use loader::{load_protocol, load_protocol_from};
pub use paths::ProtocolPaths;
pub use schema::{
    AgentDefinition, GateDefinition, InvokeDefinition, ModelConfig, ModelPolicy,
    ModelPolicyKind, PromptMode, ProtocolDefinition, ProtocolIndex, StateFormat,
    StateSettings, StepDefinition, ToolsPolicy, ToolsPolicyKind, TransitionDefinition,
    WorkflowDefinition,
};
