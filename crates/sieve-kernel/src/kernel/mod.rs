//! Kernel: commands and the engine facade built on top of the adapters.

pub mod commands;
pub mod engine;

pub use commands::ExecuteTransformation;
pub use engine::{EngineStats, OutcomeStats, TransformEngine};
