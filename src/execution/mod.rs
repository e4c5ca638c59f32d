//! Execution module
//!
//! Runs validated, parameterized SQL against the warehouse.

pub mod executor;
pub mod result;

pub use executor::*;
pub use result::*;
