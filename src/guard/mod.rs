//! Topic/Hallucination Guard

pub mod categories;
pub mod guard;

pub use categories::*;
pub use guard::*;
