//! # Connector Layer
//!
//! External integrations: DuckDB persistence, tree-sitter parsing, and the
//! HTTP providers, plus deterministic mocks for tests and offline runs.

pub mod adapter;

pub use adapter::*;
