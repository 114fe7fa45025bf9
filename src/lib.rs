//! # RepoWiki
//!
//! Indexes a source-code repository for semantic search, answers questions
//! through a multi-step research pipeline, and maintains an incremental
//! markdown wiki grounded in the indexed code.
//!
//! ## Architecture
//!
//! The crate is organized following Domain-Driven Design principles:
//!
//! - `domain`: Core models and the error type
//! - `application`: Ports, retry policy, and orchestration use cases
//! - `connector`: External integrations (DuckDB, tree-sitter, Ollama)

pub mod application;
pub mod connector;
pub mod domain;

// Re-export commonly used types
pub use application::*;
pub use connector::*;
pub use domain::*;
