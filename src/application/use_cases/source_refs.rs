use std::collections::BTreeMap;

use crate::domain::{LineRange, WikiPage};

use super::cross_link::relative_wiki_path;

pub const SOURCE_FILES_HEADING: &str = "## Relevant Source Files";
pub const SEE_ALSO_HEADING: &str = "## See Also";

/// Append a "Relevant Source Files" section listing each source file with
/// its line range and a link to its file page. Inserted before any
/// existing "See Also" section; replaces a previous section of its own,
/// so the weave is idempotent. Index pages are never modified.
pub fn weave_source_refs(
    page: &WikiPage,
    source_files: &[String],
    line_info: Option<&BTreeMap<String, LineRange>>,
    file_pages: &BTreeMap<String, String>,
) -> WikiPage {
    if source_files.is_empty() {
        return page.clone();
    }

    let mut section = String::new();
    section.push_str(SOURCE_FILES_HEADING);
    section.push_str("\n\n");
    for file in source_files {
        let range = line_info
            .and_then(|info| info.get(file))
            .map(|range| format!(" (lines {}-{})", range.start, range.end))
            .unwrap_or_default();
        match file_pages.get(file) {
            // The page never links to its own wiki path.
            Some(wiki_path) if wiki_path != page.path() => {
                section.push_str(&format!(
                    "- [`{}`]({}){}\n",
                    file,
                    relative_wiki_path(page.path(), wiki_path),
                    range
                ));
            }
            _ => {
                section.push_str(&format!("- `{}`{}\n", file, range));
            }
        }
    }

    let body = remove_section(page.content(), SOURCE_FILES_HEADING);
    let content = insert_before_section(&body, &section, SEE_ALSO_HEADING);
    page.clone().with_content(content)
}

/// Remove a `## `-level section (heading line through the line before the
/// next `## ` heading, or end of text).
pub(crate) fn remove_section(content: &str, heading: &str) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut skipping = false;
    for line in lines {
        if line.trim_end() == heading {
            skipping = true;
            continue;
        }
        if skipping && line.starts_with("## ") {
            skipping = false;
        }
        if !skipping {
            kept.push(line);
        }
    }
    let mut result = kept.join("\n");
    while result.ends_with("\n\n") {
        result.pop();
    }
    result
}

/// Insert `section` before the first occurrence of `before_heading`, or
/// append it at the end when that heading is absent.
pub(crate) fn insert_before_section(content: &str, section: &str, before_heading: &str) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let insert_at = lines
        .iter()
        .position(|line| line.trim_end() == before_heading);

    match insert_at {
        Some(position) => {
            let mut out: Vec<String> = lines[..position].iter().map(|s| s.to_string()).collect();
            out.push(section.trim_end().to_string());
            out.push(String::new());
            out.extend(lines[position..].iter().map(|s| s.to_string()));
            out.join("\n")
        }
        None => {
            let mut out = content.trim_end().to_string();
            out.push_str("\n\n");
            out.push_str(section.trim_end());
            out.push('\n');
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(path: &str, content: &str) -> WikiPage {
        WikiPage::new(path.to_string(), "Title".to_string(), content.to_string(), 1)
    }

    fn file_pages() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("src/a.rs".to_string(), "files/src/a.rs.md".to_string()),
            ("src/b.rs".to_string(), "files/src/b.rs.md".to_string()),
        ])
    }

    #[test]
    fn test_section_appended_with_links_and_ranges() {
        let line_info = BTreeMap::from([
            ("src/a.rs".to_string(), LineRange { start: 1, end: 40 }),
        ]);
        let woven = weave_source_refs(
            &page("modules/src.md", "# Module src\n\nBody."),
            &["src/a.rs".to_string(), "src/b.rs".to_string()],
            Some(&line_info),
            &file_pages(),
        );

        let content = woven.content();
        assert!(content.contains("## Relevant Source Files"));
        assert!(content.contains("- [`src/a.rs`](../files/src/a.rs.md) (lines 1-40)"));
        assert!(content.contains("- [`src/b.rs`](../files/src/b.rs.md)\n"));
    }

    #[test]
    fn test_own_file_page_not_linked() {
        let woven = weave_source_refs(
            &page("files/src/a.rs.md", "# src/a.rs\n\nBody."),
            &["src/a.rs".to_string()],
            None,
            &file_pages(),
        );
        assert!(woven.content().contains("- `src/a.rs`"));
        assert!(!woven.content().contains("](a.rs.md)"));
    }

    #[test]
    fn test_inserted_before_see_also() {
        let content = "# Page\n\nBody.\n\n## See Also\n\n- [Other](other.md)\n";
        let woven = weave_source_refs(
            &page("modules/src.md", content),
            &["src/a.rs".to_string()],
            None,
            &file_pages(),
        );
        let body = woven.content();
        let refs = body.find("## Relevant Source Files").unwrap();
        let see_also = body.find("## See Also").unwrap();
        assert!(refs < see_also);
    }

    #[test]
    fn test_weave_is_idempotent() {
        let base = page("modules/src.md", "# Module src\n\nBody.");
        let sources = ["src/a.rs".to_string()];
        let once = weave_source_refs(&base, &sources, None, &file_pages());
        let twice = weave_source_refs(&once, &sources, None, &file_pages());
        assert_eq!(once.content(), twice.content());
    }

    #[test]
    fn test_remove_section_leaves_other_sections() {
        let content = "# P\n\n## Relevant Source Files\n\n- `x`\n\n## See Also\n\n- y\n";
        let removed = remove_section(content, SOURCE_FILES_HEADING);
        assert!(!removed.contains("Relevant Source Files"));
        assert!(removed.contains("## See Also"));
    }
}
