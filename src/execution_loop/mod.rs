//! Execution loop
//!
//! Bounded correction and re-execution around the executor.

pub mod orchestrator;
pub mod retry;

pub use orchestrator::*;
pub use retry::*;
