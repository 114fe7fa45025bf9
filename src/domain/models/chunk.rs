use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Language;

/// A contiguous source region with a semantic label.
///
/// The id is derived from the location and name, so re-chunking an
/// unchanged file reproduces identical ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    id: String,
    file_path: String,
    language: Language,
    kind: ChunkKind,
    name: Option<String>,
    content: String,
    start_line: u32,
    end_line: u32,
    parent_name: Option<String>,
    metadata: BTreeMap<String, String>,
    embedding: Option<Vec<f32>>,
}

fn derive_id(file_path: &str, start_line: u32, end_line: u32, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{}:{}-{}:{}", file_path, start_line, end_line, name),
        None => format!("{}:{}-{}", file_path, start_line, end_line),
    }
}

impl Chunk {
    pub fn new(
        file_path: String,
        content: String,
        start_line: u32,
        end_line: u32,
        language: Language,
        kind: ChunkKind,
    ) -> Self {
        Self {
            id: derive_id(&file_path, start_line, end_line, None),
            file_path,
            language,
            kind,
            name: None,
            content,
            start_line,
            end_line,
            parent_name: None,
            metadata: BTreeMap::new(),
            embedding: None,
        }
    }

    /// Reconstitutes from persisted data (used by adapters).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: String,
        file_path: String,
        content: String,
        start_line: u32,
        end_line: u32,
        language: Language,
        kind: ChunkKind,
        name: Option<String>,
        parent_name: Option<String>,
        metadata: BTreeMap<String, String>,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        Self {
            id,
            file_path,
            language,
            kind,
            name,
            content,
            start_line,
            end_line,
            parent_name,
            metadata,
            embedding,
        }
    }

    /// Naming a chunk re-derives its id.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.id = derive_id(&self.file_path, self.start_line, self.end_line, Some(&name));
        self.name = Some(name);
        self
    }

    pub fn with_parent_name(mut self, parent: impl Into<String>) -> Self {
        self.parent_name = Some(parent.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = Some(embedding);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Text fed to the embedding provider: name and kind prefix the body so
    /// identifier queries rank declarations above mentions.
    pub fn embedding_text(&self) -> String {
        let mut text = String::new();
        if let Some(name) = &self.name {
            text.push_str(name);
            text.push(' ');
        }
        text.push_str(&format!("[{}] ", self.kind));
        text.push_str(&self.content);
        text
    }

    pub fn qualified_name(&self) -> Option<String> {
        match (&self.parent_name, &self.name) {
            (Some(parent), Some(name)) => Some(format!("{}.{}", parent, name)),
            (None, Some(name)) => Some(name.clone()),
            _ => None,
        }
    }

    /// Extend this chunk to absorb a following one (min-size merging).
    pub fn absorb(&mut self, other: &Chunk) {
        if other.end_line > self.end_line {
            self.end_line = other.end_line;
            self.id = derive_id(
                &self.file_path,
                self.start_line,
                self.end_line,
                self.name.as_deref(),
            );
        }
        self.content.push('\n');
        self.content.push_str(&other.content);
    }
}

/// Represents the kind of source construct a chunk covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Module,
    Class,
    Function,
    Method,
    Interface,
    Enum,
    Struct,
    Import,
    Constant,
    Other,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Module => "module",
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Interface => "interface",
            ChunkKind::Enum => "enum",
            ChunkKind::Struct => "struct",
            ChunkKind::Import => "import",
            ChunkKind::Constant => "constant",
            ChunkKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "module" => ChunkKind::Module,
            "class" => ChunkKind::Class,
            "function" => ChunkKind::Function,
            "method" => ChunkKind::Method,
            "interface" => ChunkKind::Interface,
            "enum" => ChunkKind::Enum,
            "struct" => ChunkKind::Struct,
            "import" => ChunkKind::Import,
            "constant" => ChunkKind::Constant,
            _ => ChunkKind::Other,
        }
    }

    pub fn all() -> &'static [ChunkKind] {
        &[
            ChunkKind::Module,
            ChunkKind::Class,
            ChunkKind::Function,
            ChunkKind::Method,
            ChunkKind::Interface,
            ChunkKind::Enum,
            ChunkKind::Struct,
            ChunkKind::Import,
            ChunkKind::Constant,
            ChunkKind::Other,
        ]
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: Option<&str>) -> Chunk {
        let chunk = Chunk::new(
            "src/lib.rs".to_string(),
            "fn add(a: i32, b: i32) -> i32 { a + b }".to_string(),
            10,
            12,
            Language::Rust,
            ChunkKind::Function,
        );
        match name {
            Some(name) => chunk.with_name(name),
            None => chunk,
        }
    }

    #[test]
    fn test_id_derivation() {
        assert_eq!(sample(None).id(), "src/lib.rs:10-12");
        assert_eq!(sample(Some("add")).id(), "src/lib.rs:10-12:add");
    }

    #[test]
    fn test_location_and_lines() {
        let chunk = sample(Some("add"));
        assert_eq!(chunk.location(), "src/lib.rs:10-12");
        assert_eq!(chunk.line_count(), 3);
    }

    #[test]
    fn test_qualified_name() {
        let chunk = sample(Some("add")).with_parent_name("Math");
        assert_eq!(chunk.qualified_name(), Some("Math.add".to_string()));
    }

    #[test]
    fn test_absorb_extends_span_and_id() {
        let mut chunk = sample(Some("add"));
        let tail = Chunk::new(
            "src/lib.rs".to_string(),
            "const X: i32 = 1;".to_string(),
            13,
            13,
            Language::Rust,
            ChunkKind::Constant,
        );
        chunk.absorb(&tail);
        assert_eq!(chunk.end_line(), 13);
        assert_eq!(chunk.id(), "src/lib.rs:10-13:add");
        assert!(chunk.content().contains("const X"));
    }

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in ChunkKind::all() {
            assert_eq!(ChunkKind::parse(kind.as_str()), *kind);
        }
        assert_eq!(ChunkKind::parse("widget"), ChunkKind::Other);
    }
}
