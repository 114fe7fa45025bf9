use std::collections::HashSet;

use streaming_iterator::StreamingIterator;
use tracing::{debug, warn};
use tree_sitter::{Parser, Query, QueryCursor};

use crate::application::Chunker;
use crate::domain::{Chunk, ChunkKind, CoreError, Language};

/// Tuning knobs for chunk extraction.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Chunks smaller than this many bytes merge into the preceding chunk.
    pub min_chunk_bytes: usize,
    /// Files larger than this are windowed instead of parsed.
    pub max_file_bytes: usize,
    pub window_lines: u32,
    pub window_overlap: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_bytes: 20,
            max_file_bytes: 512 * 1024,
            window_lines: 200,
            window_overlap: 20,
        }
    }
}

/// Language-aware chunker backed by tree-sitter grammars.
///
/// Emits one MODULE chunk for the leading comment/import region plus one
/// chunk per top-level declaration; class-like declarations additionally
/// yield one chunk per direct child method with `parent_name` set.
pub struct TreeSitterChunker {
    config: ChunkerConfig,
    supported_languages: Vec<Language>,
}

impl TreeSitterChunker {
    pub fn new() -> Self {
        Self::with_config(ChunkerConfig::default())
    }

    pub fn with_config(config: ChunkerConfig) -> Self {
        Self {
            config,
            supported_languages: vec![
                Language::Rust,
                Language::Python,
                Language::JavaScript,
                Language::TypeScript,
                Language::Go,
            ],
        }
    }

    fn get_ts_language(&self, language: Language) -> Option<tree_sitter::Language> {
        match language {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Unknown => None,
        }
    }

    fn get_query_patterns(&self, language: Language) -> &'static str {
        match language {
            Language::Rust => {
                r#"
                (source_file (function_item name: (identifier) @name) @function)
                (source_file (struct_item name: (type_identifier) @name) @struct)
                (source_file (enum_item name: (type_identifier) @name) @enum)
                (source_file (trait_item name: (type_identifier) @name) @interface)
                (source_file (mod_item name: (identifier) @name) @module_decl)
                (source_file (const_item name: (identifier) @name) @constant)
                (source_file (static_item name: (identifier) @name) @constant)

                ; impl blocks act as the class-like container for methods
                (source_file (impl_item type: (_) @name) @class)
                (impl_item
                  type: (_) @parent.name
                  body: (declaration_list
                    (function_item name: (identifier) @name) @method))
                "#
            }
            Language::Python => {
                r#"
                (module (function_definition name: (identifier) @name) @function)
                (module (class_definition name: (identifier) @name) @class)
                (module (decorated_definition
                  (function_definition name: (identifier) @name)) @function)
                (module (decorated_definition
                  (class_definition name: (identifier) @name)) @class)
                (module (expression_statement
                  (assignment left: (identifier) @name)) @constant)

                (class_definition
                  name: (identifier) @parent.name
                  body: (block
                    (function_definition name: (identifier) @name) @method))
                (class_definition
                  name: (identifier) @parent.name
                  body: (block
                    (decorated_definition
                      (function_definition name: (identifier) @name)) @method))
                "#
            }
            Language::JavaScript => {
                r#"
                (program (function_declaration name: (identifier) @name) @function)
                (program (class_declaration name: (identifier) @name) @class)
                (program (lexical_declaration
                  (variable_declarator name: (identifier) @name)) @constant)
                (program (variable_declaration
                  (variable_declarator name: (identifier) @name)) @constant)
                (program (export_statement
                  (function_declaration name: (identifier) @name)) @function)
                (program (export_statement
                  (class_declaration name: (identifier) @name)) @class)
                (program (export_statement
                  (lexical_declaration
                    (variable_declarator name: (identifier) @name))) @constant)

                (class_declaration
                  name: (identifier) @parent.name
                  body: (class_body
                    (method_definition name: (property_identifier) @name) @method))
                "#
            }
            Language::TypeScript => {
                r#"
                (program (function_declaration name: (identifier) @name) @function)
                (program (class_declaration name: (type_identifier) @name) @class)
                (program (interface_declaration name: (type_identifier) @name) @interface)
                (program (enum_declaration name: (identifier) @name) @enum)
                (program (type_alias_declaration name: (type_identifier) @name) @other)
                (program (lexical_declaration
                  (variable_declarator name: (identifier) @name)) @constant)
                (program (export_statement
                  (function_declaration name: (identifier) @name)) @function)
                (program (export_statement
                  (class_declaration name: (type_identifier) @name)) @class)
                (program (export_statement
                  (interface_declaration name: (type_identifier) @name)) @interface)
                (program (export_statement
                  (enum_declaration name: (identifier) @name)) @enum)
                (program (export_statement
                  (type_alias_declaration name: (type_identifier) @name)) @other)
                (program (export_statement
                  (lexical_declaration
                    (variable_declarator name: (identifier) @name))) @constant)

                (class_declaration
                  name: (type_identifier) @parent.name
                  body: (class_body
                    (method_definition name: (property_identifier) @name) @method))
                "#
            }
            Language::Go => {
                r#"
                (source_file (function_declaration name: (identifier) @name) @function)
                (source_file (method_declaration
                  receiver: (parameter_list
                    (parameter_declaration
                      type: [
                        (pointer_type (type_identifier) @parent.name)
                        (type_identifier) @parent.name
                      ]))
                  name: (field_identifier) @name) @method)
                (source_file (type_declaration
                  (type_spec name: (type_identifier) @name type: (struct_type))) @struct)
                (source_file (type_declaration
                  (type_spec name: (type_identifier) @name type: (interface_type))) @interface)
                (source_file (const_declaration) @constant)
                (source_file (var_declaration) @constant)
                "#
            }
            Language::Unknown => "",
        }
    }

    fn capture_to_kind(capture_name: &str) -> ChunkKind {
        match capture_name {
            "function" => ChunkKind::Function,
            "class" => ChunkKind::Class,
            "method" => ChunkKind::Method,
            "struct" => ChunkKind::Struct,
            "enum" => ChunkKind::Enum,
            "interface" => ChunkKind::Interface,
            "constant" => ChunkKind::Constant,
            "module_decl" => ChunkKind::Module,
            "import" => ChunkKind::Import,
            _ => ChunkKind::Other,
        }
    }

    /// A single MODULE chunk spanning the whole file; the fallback for
    /// unsupported languages and unparseable input.
    fn whole_file_module(file_path: &str, content: &str, language: Language) -> Chunk {
        let end_line = content.lines().count().max(1) as u32;
        Chunk::new(
            file_path.to_string(),
            content.to_string(),
            1,
            end_line,
            language,
            ChunkKind::Module,
        )
    }

    /// Fixed-line windows with overlap, for files above the size cap.
    fn window_file(&self, file_path: &str, content: &str, language: Language) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len().max(1) as u32;
        let window = self.config.window_lines.max(1);
        let step = window.saturating_sub(self.config.window_overlap).max(1);

        let mut chunks = Vec::new();
        let mut start = 1u32;
        while start <= total {
            let end = (start + window - 1).min(total);
            let body = lines[(start - 1) as usize..end as usize].join("\n");
            chunks.push(
                Chunk::new(
                    file_path.to_string(),
                    body,
                    start,
                    end,
                    language,
                    ChunkKind::Other,
                )
                .with_metadata("windowed", "true"),
            );
            if end == total {
                break;
            }
            start += step;
        }
        chunks
    }

    fn parse_declarations(
        &self,
        file_path: &str,
        content: &str,
        language: Language,
    ) -> Result<Option<Vec<Chunk>>, CoreError> {
        let ts_language = match self.get_ts_language(language) {
            Some(lang) => lang,
            None => return Ok(None),
        };

        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| CoreError::parse(format!("Failed to set language: {}", e)))?;

        let tree = match parser.parse(content, None) {
            Some(tree) => tree,
            None => return Ok(None),
        };

        let query_source = self.get_query_patterns(language);
        let query = Query::new(&ts_language, query_source)
            .map_err(|e| CoreError::parse(format!("Failed to create query: {}", e)))?;

        let mut cursor = QueryCursor::new();
        let text_bytes = content.as_bytes();
        let capture_names: Vec<&str> = query.capture_names().to_vec();

        let mut chunks = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut matches_iter = cursor.matches(&query, tree.root_node(), text_bytes);

        while let Some(query_match) = matches_iter.next() {
            let mut name: Option<String> = None;
            let mut parent_name: Option<String> = None;
            let mut main_node = None;
            let mut kind = ChunkKind::Other;

            for capture in query_match.captures {
                let capture_name = capture_names
                    .get(capture.index as usize)
                    .copied()
                    .unwrap_or("");

                if capture_name == "name" {
                    name = Some(content[capture.node.byte_range()].to_string());
                } else if capture_name.ends_with(".name") {
                    parent_name = Some(content[capture.node.byte_range()].to_string());
                } else {
                    main_node = Some(capture.node);
                    kind = Self::capture_to_kind(capture_name);
                }
            }

            let node = match main_node {
                Some(node) => node,
                None => continue,
            };

            let start_line = node.start_position().row as u32 + 1;
            let end_line = node.end_position().row as u32 + 1;
            let body = content[node.byte_range()].to_string();

            let mut chunk = Chunk::new(
                file_path.to_string(),
                body,
                start_line,
                end_line,
                language,
                kind,
            );
            if let Some(name) = name {
                chunk = chunk.with_name(name);
            }
            if let Some(parent) = parent_name {
                chunk = chunk.with_parent_name(parent);
            }
            if node.has_error() {
                chunk = chunk.with_metadata("parse_errors", "true");
            }

            if seen_ids.insert(chunk.id().to_string()) {
                chunks.push(chunk);
            }
        }

        // MODULE chunk for the leading comment/import region. When the first
        // top-level declaration starts on line 1 (or nothing was extracted)
        // the module chunk spans the whole file.
        let first_decl_line = chunks
            .iter()
            .filter(|c| c.kind() != ChunkKind::Method)
            .map(Chunk::start_line)
            .min();

        let mut module = match first_decl_line {
            Some(first) if first > 1 => {
                let body: String = content
                    .lines()
                    .take((first - 1) as usize)
                    .collect::<Vec<_>>()
                    .join("\n");
                Chunk::new(
                    file_path.to_string(),
                    body,
                    1,
                    first - 1,
                    language,
                    ChunkKind::Module,
                )
            }
            _ => Self::whole_file_module(file_path, content, language),
        };
        if tree.root_node().has_error() {
            module = module.with_metadata("parse_errors", "true");
        }

        // Containers before their members, module first.
        chunks.sort_by(|a, b| {
            a.start_line()
                .cmp(&b.start_line())
                .then_with(|| b.end_line().cmp(&a.end_line()))
                .then_with(|| a.id().cmp(b.id()))
        });
        let mut ordered = vec![module];
        ordered.extend(chunks);

        Ok(Some(self.merge_small_chunks(ordered)))
    }

    /// Merge sub-threshold chunks into their predecessor. MODULE is always
    /// emitted regardless of size.
    fn merge_small_chunks(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let is_small = chunk.content().len() < self.config.min_chunk_bytes;
            if is_small && chunk.kind() != ChunkKind::Module {
                if let Some(previous) = merged.last_mut() {
                    previous.absorb(&chunk);
                    continue;
                }
            }
            merged.push(chunk);
        }
        merged
    }
}

impl Default for TreeSitterChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for TreeSitterChunker {
    fn chunk_file(
        &self,
        file_path: &str,
        bytes: &[u8],
        language: Language,
    ) -> Result<Vec<Chunk>, CoreError> {
        let content = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                warn!(
                    "File {} contains invalid UTF-8; replacing offending sequences",
                    file_path
                );
                String::from_utf8_lossy(bytes).into_owned()
            }
        };

        if bytes.len() > self.config.max_file_bytes {
            debug!(
                "File {} exceeds size cap ({} bytes); windowing",
                file_path,
                bytes.len()
            );
            return Ok(self.window_file(file_path, &content, language));
        }

        let chunks = match self.parse_declarations(file_path, &content, language)? {
            Some(chunks) => chunks,
            None => vec![Self::whole_file_module(file_path, &content, language)],
        };

        debug!(
            "Chunked {} into {} chunks ({:?})",
            file_path,
            chunks.len(),
            language
        );
        Ok(chunks)
    }

    fn supported_languages(&self) -> Vec<Language> {
        self.supported_languages.clone()
    }
}
