pub mod options;

pub use options::{EngineOptions, PROTOCOL_DIR_ENV, STATE_DIR_ENV};
