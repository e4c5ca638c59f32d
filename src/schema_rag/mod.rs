pub mod embedder;
pub mod retriever;
pub mod vector_store;

pub use embedder::*;
pub use retriever::*;
pub use vector_store::*;
