use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CoreError, WikiPage};

/// Well-known filename at the wiki root.
pub const SEARCH_INDEX_FILE: &str = "search_index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub path: String,
    pub title: String,
    pub headings: Vec<String>,
    pub terms: Vec<String>,
    pub snippet: String,
}

/// Extracts headings, identifier terms and a plain-text snippet from each
/// wiki page and persists the lot as one JSON document.
#[derive(Debug, Clone)]
pub struct SearchIndexBuilder {
    /// Inline code longer than this is skipped when collecting terms.
    pub max_term_length: usize,
    pub snippet_length: usize,
}

impl Default for SearchIndexBuilder {
    fn default() -> Self {
        Self {
            max_term_length: 48,
            snippet_length: 240,
        }
    }
}

impl SearchIndexBuilder {
    pub fn build(&self, pages: &[WikiPage]) -> Vec<SearchIndexEntry> {
        let mut entries: Vec<SearchIndexEntry> = pages
            .iter()
            .map(|page| SearchIndexEntry {
                path: page.path().to_string(),
                title: page.title().to_string(),
                headings: extract_headings(page.content()),
                terms: self.extract_terms(page.content()),
                snippet: self.extract_snippet(page.content()),
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    pub async fn write(
        &self,
        wiki_root: &Path,
        entries: &[SearchIndexEntry],
    ) -> Result<(), CoreError> {
        tokio::fs::create_dir_all(wiki_root).await?;
        let path = wiki_root.join(SEARCH_INDEX_FILE);
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| CoreError::storage(format!("Failed to serialize search index: {}", e)))?;
        tokio::fs::write(&path, json).await?;
        debug!("Wrote search index with {} entries", entries.len());
        Ok(())
    }

    /// Back-ticked identifiers plus dotted qualified names from prose.
    fn extract_terms(&self, content: &str) -> Vec<String> {
        let mut terms = BTreeSet::new();
        let mut in_fence = false;

        for line in content.split('\n') {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }

            let mut rest = line;
            while let Some(open) = rest.find('`') {
                let tail = &rest[open + 1..];
                match tail.find('`') {
                    Some(close) => {
                        let span = &tail[..close];
                        if !span.is_empty() && span.len() <= self.max_term_length {
                            terms.insert(span.to_string());
                        }
                        rest = &tail[close + 1..];
                    }
                    None => break,
                }
            }

            for token in line.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.')) {
                let token = token.trim_matches('.');
                if token.contains('.')
                    && token.len() <= self.max_term_length
                    && token.split('.').all(|part| {
                        !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_')
                    })
                    && token.chars().any(|c| c.is_alphabetic())
                {
                    terms.insert(token.to_string());
                }
            }
        }
        terms.into_iter().collect()
    }

    /// Strip code fences, headings and link syntax (keeping anchor text),
    /// then truncate on a word boundary.
    fn extract_snippet(&self, content: &str) -> String {
        let mut plain = String::new();
        let mut in_fence = false;

        for line in content.split('\n') {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence || trimmed.starts_with('#') {
                continue;
            }
            let stripped = strip_inline_markup(line);
            let stripped = stripped.trim();
            if stripped.is_empty() {
                continue;
            }
            if !plain.is_empty() {
                plain.push(' ');
            }
            plain.push_str(stripped);
        }

        truncate_on_word_boundary(&plain, self.snippet_length)
    }
}

fn extract_headings(content: &str) -> Vec<String> {
    let mut headings = Vec::new();
    let mut in_fence = false;
    for line in content.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let marker_len = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&marker_len) {
            let text = trimmed[marker_len..].trim();
            if !text.is_empty() {
                headings.push(text.to_string());
            }
        }
    }
    headings
}

/// Convert `[text](url)` to `text`, drop backticks and bold markers.
fn strip_inline_markup(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let c = match line[i..].chars().next() {
            Some(c) => c,
            None => break,
        };
        if c == '[' {
            if let Some(close) = line[i..].find(']') {
                let after = i + close + 1;
                if line[after..].starts_with('(') {
                    if let Some(paren) = line[after..].find(')') {
                        out.push_str(&line[i + 1..i + close]);
                        i = after + paren + 1;
                        continue;
                    }
                }
            }
        }
        if c == '`' {
            i += 1;
            continue;
        }
        if line[i..].starts_with("**") {
            i += 2;
            continue;
        }
        out.push(c);
        i += c.len_utf8();
    }
    out
}

fn truncate_on_word_boundary(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let cut = text[..limit]
        .rfind(char::is_whitespace)
        .unwrap_or(limit);
    let mut snippet = text[..cut].trim_end().to_string();
    snippet.push_str("...");
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(content: &str) -> WikiPage {
        WikiPage::new(
            "modules/core.md".to_string(),
            "core".to_string(),
            content.to_string(),
            1,
        )
    }

    #[test]
    fn test_headings_collected_without_markers() {
        let entries = SearchIndexBuilder::default().build(&[page(
            "# Top\n\nBody\n\n## Second level\n\n###### Deep\n",
        )]);
        assert_eq!(entries[0].headings, vec!["Top", "Second level", "Deep"]);
    }

    #[test]
    fn test_terms_from_backticks_and_dotted_names() {
        let builder = SearchIndexBuilder::default();
        let entries = builder.build(&[page(
            "Uses `VectorStore` and calls indexer.chunker.run in places.\n",
        )]);
        assert!(entries[0].terms.contains(&"VectorStore".to_string()));
        assert!(entries[0].terms.contains(&"indexer.chunker.run".to_string()));
    }

    #[test]
    fn test_long_inline_code_skipped() {
        let builder = SearchIndexBuilder {
            max_term_length: 10,
            snippet_length: 240,
        };
        let entries = builder.build(&[page("A `short` and `a_very_long_inline_code_span`.\n")]);
        assert!(entries[0].terms.contains(&"short".to_string()));
        assert_eq!(entries[0].terms.len(), 1);
    }

    #[test]
    fn test_snippet_strips_markup_and_truncates() {
        let builder = SearchIndexBuilder {
            max_term_length: 48,
            snippet_length: 30,
        };
        let content = "# Heading\n\n```rust\nfn hidden() {}\n```\n\nSee [the indexer](idx.md) for **details** about chunk handling today.\n";
        let entries = builder.build(&[page(content)]);
        let snippet = &entries[0].snippet;
        assert!(!snippet.contains("Heading"));
        assert!(!snippet.contains("hidden"));
        assert!(!snippet.contains("]("));
        assert!(snippet.starts_with("See the indexer for details"));
        assert!(snippet.ends_with("..."));
        assert!(snippet.len() <= 33);
    }

    #[test]
    fn test_fenced_terms_excluded() {
        let entries = SearchIndexBuilder::default()
            .build(&[page("```python\nos.path.join(a, b)\n```\n\nProse only.\n")]);
        assert!(entries[0].terms.is_empty());
    }

    #[tokio::test]
    async fn test_index_written_to_well_known_path() {
        let dir = tempfile::tempdir().unwrap();
        let builder = SearchIndexBuilder::default();
        let entries = builder.build(&[page("# T\n\nBody text here.\n")]);
        builder.write(dir.path(), &entries).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(SEARCH_INDEX_FILE)).unwrap();
        let parsed: Vec<SearchIndexEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].path, "modules/core.md");
    }
}
