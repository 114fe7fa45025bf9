mod chunker;
mod llm_provider;
mod status_repository;
mod vector_store;

pub use chunker::*;
pub use llm_provider::*;
pub use status_repository::*;
pub use vector_store::*;
