mod duckdb_vector_store;
mod json_status_repository;
mod memory_vector_store;
mod mock_embedding;
mod mock_llm;
mod ollama_embedding;
mod ollama_llm;
mod treesitter_chunker;

pub use duckdb_vector_store::*;
pub use json_status_repository::*;
pub use memory_vector_store::*;
pub use mock_embedding::*;
pub use mock_llm::*;
pub use ollama_embedding::*;
pub use ollama_llm::*;
pub use treesitter_chunker::*;
