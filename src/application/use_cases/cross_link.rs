use crate::domain::{Entity, EntityRegistry, WikiPage};

/// Rewrites prose mentions of registered entities into markdown links.
///
/// Pure text transform and a fixpoint: applying it twice yields the same
/// output, because fenced code, inline code spans that were already
/// wrapped, and existing links are never touched again.
pub fn weave_cross_links(page: &WikiPage, registry: &EntityRegistry) -> WikiPage {
    let woven = weave_content(page.content(), registry, page.path());
    page.clone().with_content(woven)
}

pub fn weave_content(content: &str, registry: &EntityRegistry, own_path: &str) -> String {
    let patterns = registry.link_patterns();
    if patterns.is_empty() {
        return content.to_string();
    }

    let mut out = Vec::new();
    let mut in_fence = false;
    for line in content.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            out.push(line.to_string());
            continue;
        }
        out.push(weave_inline(line, &patterns, own_path));
    }
    out.join("\n")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Pick the longest pattern matching at `i` on whole-word boundaries,
/// excluding self-links.
fn match_pattern_at<'a>(
    text: &str,
    i: usize,
    patterns: &[(&'a str, &'a Entity)],
    own_path: &str,
) -> Option<(&'a str, &'a Entity)> {
    for (pattern, entity) in patterns {
        if entity.wiki_path() == own_path {
            continue;
        }
        if !text[i..].starts_with(pattern) {
            continue;
        }
        let after = i + pattern.len();
        let boundary_after = text[after..].chars().next().map_or(true, |c| !is_word_char(c));
        if boundary_after {
            return Some((pattern, entity));
        }
    }
    None
}

fn weave_inline(text: &str, patterns: &[(&str, &Entity)], own_path: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < text.len() {
        let c = match text[i..].chars().next() {
            Some(c) => c,
            None => break,
        };

        // Inline code: link the whole span when it names an entity exactly,
        // preserving the monospace rendering; never rewrite inside it.
        if c == '`' {
            if let Some(rel) = text[i + 1..].find('`') {
                let span = &text[i + 1..i + 1 + rel];
                let end = i + 1 + rel + 1;
                match patterns
                    .iter()
                    .find(|(pattern, entity)| *pattern == span && entity.wiki_path() != own_path)
                {
                    Some((_, entity)) => {
                        out.push_str(&format!(
                            "[`{}`]({})",
                            span,
                            relative_wiki_path(own_path, entity.wiki_path())
                        ));
                    }
                    None => {
                        out.push('`');
                        out.push_str(span);
                        out.push('`');
                    }
                }
                i = end;
                continue;
            }
            out.push('`');
            i += 1;
            continue;
        }

        // Existing markdown links pass through untouched.
        if c == '[' {
            if let Some(close) = text[i..].find(']') {
                let after = i + close + 1;
                if text[after..].starts_with('(') {
                    if let Some(paren) = text[after..].find(')') {
                        let end = after + paren + 1;
                        out.push_str(&text[i..end]);
                        i = end;
                        continue;
                    }
                }
            }
            out.push('[');
            i += 1;
            continue;
        }

        // Bold spans keep their markers; the interior is woven like prose.
        if text[i..].starts_with("**") {
            if let Some(rel) = text[i + 2..].find("**") {
                let interior = &text[i + 2..i + 2 + rel];
                out.push_str("**");
                out.push_str(&weave_inline(interior, patterns, own_path));
                out.push_str("**");
                i = i + 2 + rel + 2;
                continue;
            }
            out.push_str("**");
            i += 2;
            continue;
        }

        if is_word_char(c) {
            let boundary_before = text[..i].chars().next_back().map_or(true, |p| !is_word_char(p));
            if boundary_before {
                if let Some((pattern, entity)) = match_pattern_at(text, i, patterns, own_path) {
                    out.push_str(&format!(
                        "[{}]({})",
                        pattern,
                        relative_wiki_path(own_path, entity.wiki_path())
                    ));
                    i += pattern.len();
                    continue;
                }
            }
        }

        out.push(c);
        i += c.len_utf8();
    }
    out
}

/// Relative path from one wiki page to another, by pure path arithmetic.
pub fn relative_wiki_path(from: &str, to: &str) -> String {
    let from_parts: Vec<&str> = from.split('/').collect();
    let from_dir = &from_parts[..from_parts.len().saturating_sub(1)];
    let to_parts: Vec<&str> = to.split('/').collect();
    let to_dir = &to_parts[..to_parts.len().saturating_sub(1)];

    let mut common = 0;
    while common < from_dir.len() && common < to_dir.len() && from_dir[common] == to_dir[common] {
        common += 1;
    }

    let mut rel = String::new();
    for _ in common..from_dir.len() {
        rel.push_str("../");
    }
    rel.push_str(&to_parts[common..].join("/"));
    rel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChunkKind;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry.register(
            "VectorStore",
            ChunkKind::Class,
            "vectorstore.md",
            "store.py",
        );
        registry
    }

    fn weave(content: &str, own_path: &str) -> String {
        weave_content(content, &registry(), own_path)
    }

    #[test]
    fn test_bold_and_inline_code_forms() {
        let woven = weave(
            "The **Vector Store** uses `VectorStore` internally.",
            "other.md",
        );
        assert_eq!(
            woven,
            "The **[Vector Store](vectorstore.md)** uses [`VectorStore`](vectorstore.md) internally."
        );
    }

    #[test]
    fn test_plain_prose_replacement() {
        assert_eq!(
            weave("Call VectorStore here.", "other.md"),
            "Call [VectorStore](vectorstore.md) here."
        );
    }

    #[test]
    fn test_whole_word_only() {
        assert_eq!(
            weave("MyVectorStore and VectorStores stay put.", "other.md"),
            "MyVectorStore and VectorStores stay put."
        );
    }

    #[test]
    fn test_never_inside_code_fence() {
        let content = "```rust\nlet s = VectorStore::new();\n```\nVectorStore outside.";
        let woven = weave(content, "other.md");
        assert!(woven.contains("let s = VectorStore::new();"));
        assert!(woven.ends_with("[VectorStore](vectorstore.md) outside."));
    }

    #[test]
    fn test_never_inside_existing_link() {
        let content = "[VectorStore docs](https://example.com) and VectorStore.";
        let woven = weave(content, "other.md");
        assert!(woven.starts_with("[VectorStore docs](https://example.com)"));
        assert!(woven.ends_with("and [VectorStore](vectorstore.md)."));
    }

    #[test]
    fn test_no_self_link() {
        assert_eq!(
            weave("VectorStore documents itself.", "vectorstore.md"),
            "VectorStore documents itself."
        );
    }

    #[test]
    fn test_weave_is_fixpoint() {
        let content =
            "The **Vector Store** uses `VectorStore` internally.\n\nVectorStore appears twice: VectorStore.";
        let once = weave(content, "other.md");
        let twice = weave(&once, "other.md");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_matching_inline_code_untouched() {
        assert_eq!(
            weave("Run `cargo build` first.", "other.md"),
            "Run `cargo build` first."
        );
    }

    #[test]
    fn test_relative_paths() {
        assert_eq!(relative_wiki_path("index.md", "vectorstore.md"), "vectorstore.md");
        assert_eq!(
            relative_wiki_path("modules/core.md", "files/src/a.rs.md"),
            "../files/src/a.rs.md"
        );
        assert_eq!(
            relative_wiki_path("files/src/a.rs.md", "files/src/b.rs.md"),
            "b.rs.md"
        );
        assert_eq!(
            relative_wiki_path("files/src/deep/a.rs.md", "index.md"),
            "../../../index.md"
        );
    }

    #[test]
    fn test_alias_requires_word_boundaries() {
        assert_eq!(
            weave("A Vector Storefront is different.", "other.md"),
            "A Vector Storefront is different."
        );
    }
}
