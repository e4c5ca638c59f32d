//! Guarded query pipeline: takes a candidate SQL statement for a
//! natural-language question and turns it into a result set from a
//! read-only warehouse, with topic guarding, injection checks, bounded
//! self-correction and confidence routing.

pub mod cache;
pub mod confidence;
pub mod config;
pub mod correction;
pub mod db;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod guard;
pub mod observability;
pub mod pipeline;
pub mod safety;
pub mod schema_rag;
pub mod security;

pub use config::PipelineConfig;
pub use error::{ErrorKind, GuardError, Result};
pub use pipeline::{GeneratedSql, GuardedQueryPipeline, PipelineBuilder, PipelineOutput, QueryRequest, SqlGenerator};
