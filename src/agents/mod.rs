//! Protocol agents layered over host-provided base agents.
//!
//! A protocol agent either stands alone (`prompt` required) or extends a base
//! agent from a [`BaseAgentCatalog`]. Prompt, model and tool set are each merged by
//! their own policy; referenced rule documents are attached in reference order.

pub mod resolver;

pub use resolver::{resolve, resolve_all, BaseAgent, BaseAgentCatalog, ResolvedAgent};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent `{agent}` extends unknown base agent `{base}`")]
    UnknownBaseAgent { agent: String, base: String },
    #[error("agent `{agent}` references unknown rule `{rule}`")]
    UnknownRule { agent: String, rule: String },
    #[error("agent `{agent}` overrides its model without `model.config`")]
    MissingModelConfig { agent: String },
    #[error("agent `{agent}` has no prompt and no base agent")]
    MissingPrompt { agent: String },
}
