//! Confidence module
//!
//! Multi-factor confidence scoring and result routing.

pub mod factors;
pub mod router;
pub mod scorer;

pub use factors::*;
pub use router::*;
pub use scorer::*;
