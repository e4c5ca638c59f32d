//! SQL Safety Analyzer
//!
//! Parameterization, injection detection and the read-only / identifier gates.

pub mod guardrails;
pub mod inspect;
pub mod parameterizer;

pub use guardrails::*;
pub use inspect::*;
pub use parameterizer::*;
