//! Logging, audit trail and review queue

pub mod audit;
pub mod logging;
pub mod review_queue;

pub use audit::*;
pub use logging::*;
pub use review_queue::*;
