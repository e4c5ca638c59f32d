//! Correction module
//!
//! Error classification and rule-based SQL correction.

pub mod agent;
pub mod classifier;
pub mod strategies;
pub mod synonyms;

pub use agent::*;
pub use classifier::*;
pub use strategies::*;
