pub mod agents;
pub mod config;
pub mod gate;
pub mod orchestration;
pub mod protocol;
pub mod shared;
pub mod snippets;

pub use config::EngineOptions;
pub use orchestration::{Engine, EngineError, EngineStatus, TransitionResult};
