use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A generated markdown page, addressed relative to the wiki root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiPage {
    path: String,
    title: String,
    content: String,
    generated_at: u64,
}

impl WikiPage {
    pub fn new(path: String, title: String, content: String, generated_at: u64) -> Self {
        Self {
            path,
            title,
            content,
            generated_at,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn generated_at(&self) -> u64 {
        self.generated_at
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.content = content;
        self
    }
}

/// 1-based inclusive line span of a file's contribution to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Persisted evidence of what a prior generator run produced for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiPageStatus {
    path: String,
    source_files: Vec<String>,
    source_hashes: BTreeMap<String, String>,
    content_hash: String,
    generated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_info: Option<BTreeMap<String, LineRange>>,
}

impl WikiPageStatus {
    pub fn new(
        path: String,
        source_files: Vec<String>,
        source_hashes: BTreeMap<String, String>,
        content_hash: String,
        generated_at: u64,
    ) -> Self {
        Self {
            path,
            source_files,
            source_hashes,
            content_hash,
            generated_at,
            line_info: None,
        }
    }

    pub fn with_line_info(mut self, line_info: BTreeMap<String, LineRange>) -> Self {
        self.line_info = Some(line_info);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source_files(&self) -> &[String] {
        &self.source_files
    }

    pub fn source_hashes(&self) -> &BTreeMap<String, String> {
        &self.source_hashes
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn generated_at(&self) -> u64 {
        self.generated_at
    }

    pub fn line_info(&self) -> Option<&BTreeMap<String, LineRange>> {
        self.line_info.as_ref()
    }
}

/// Top-level status document written once per generator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiGenerationStatus {
    repo_path: String,
    generated_at: u64,
    total_pages: u64,
    index_status_hash: String,
    pages: BTreeMap<String, WikiPageStatus>,
}

impl WikiGenerationStatus {
    pub fn new(
        repo_path: String,
        generated_at: u64,
        index_status_hash: String,
        pages: BTreeMap<String, WikiPageStatus>,
    ) -> Self {
        Self {
            repo_path,
            generated_at,
            total_pages: pages.len() as u64,
            index_status_hash,
            pages,
        }
    }

    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    pub fn generated_at(&self) -> u64 {
        self.generated_at
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn index_status_hash(&self) -> &str {
        &self.index_status_hash
    }

    pub fn pages(&self) -> &BTreeMap<String, WikiPageStatus> {
        &self.pages
    }

    pub fn page(&self, path: &str) -> Option<&WikiPageStatus> {
        self.pages.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialises_with_sorted_keys() {
        let mut pages = BTreeMap::new();
        pages.insert(
            "zeta.md".to_string(),
            WikiPageStatus::new(
                "zeta.md".to_string(),
                vec!["z.rs".to_string()],
                BTreeMap::from([("z.rs".to_string(), "ff".to_string())]),
                "hash-z".to_string(),
                10,
            ),
        );
        pages.insert(
            "alpha.md".to_string(),
            WikiPageStatus::new(
                "alpha.md".to_string(),
                vec!["a.rs".to_string()],
                BTreeMap::from([("a.rs".to_string(), "aa".to_string())]),
                "hash-a".to_string(),
                10,
            ),
        );

        let status =
            WikiGenerationStatus::new("/repo".to_string(), 10, "idx".to_string(), pages);
        let json = serde_json::to_string(&status).unwrap();
        let alpha = json.find("alpha.md").unwrap();
        let zeta = json.find("zeta.md").unwrap();
        assert!(alpha < zeta);
        assert_eq!(status.total_pages(), 2);
    }

    #[test]
    fn test_line_info_omitted_when_absent() {
        let status = WikiPageStatus::new(
            "a.md".to_string(),
            vec![],
            BTreeMap::new(),
            "h".to_string(),
            1,
        );
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("line_info"));
    }
}
