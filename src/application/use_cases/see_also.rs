use std::collections::{BTreeMap, HashMap};

use petgraph::graphmap::UnGraphMap;

use crate::domain::WikiPage;

use super::cross_link::relative_wiki_path;
use super::source_refs::{remove_section, SEE_ALSO_HEADING};

#[derive(Debug, Clone)]
pub struct SeeAlsoOptions {
    /// Pages must share at least this many source files to be linked.
    pub min_shared: usize,
    /// Cap on links per page.
    pub max_links: usize,
}

impl Default for SeeAlsoOptions {
    fn default() -> Self {
        Self {
            min_shared: 2,
            max_links: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeeAlsoLink {
    pub path: String,
    pub title: String,
    pub shared: usize,
}

/// Pure graph computation: pages become nodes, an edge carries the number
/// of shared source-file dependencies, and each page links to its
/// highest-overlap neighbours.
pub fn compute_see_also(
    pages: &[(String, String, Vec<String>)],
    options: &SeeAlsoOptions,
) -> BTreeMap<String, Vec<SeeAlsoLink>> {
    let mut file_to_pages: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, (_, _, sources)) in pages.iter().enumerate() {
        for file in sources {
            file_to_pages.entry(file.as_str()).or_default().push(index);
        }
    }

    let mut shared_counts: HashMap<(usize, usize), usize> = HashMap::new();
    for indices in file_to_pages.values() {
        for (position, &a) in indices.iter().enumerate() {
            for &b in &indices[position + 1..] {
                let key = if a < b { (a, b) } else { (b, a) };
                *shared_counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    let mut graph: UnGraphMap<usize, usize> = UnGraphMap::new();
    for index in 0..pages.len() {
        graph.add_node(index);
    }
    for ((a, b), shared) in shared_counts {
        if shared >= options.min_shared {
            graph.add_edge(a, b, shared);
        }
    }

    let mut result = BTreeMap::new();
    for (index, (path, _, _)) in pages.iter().enumerate() {
        let mut links: Vec<SeeAlsoLink> = graph
            .edges(index)
            .map(|(a, b, shared)| {
                let neighbour = if a == index { b } else { a };
                SeeAlsoLink {
                    path: pages[neighbour].0.clone(),
                    title: pages[neighbour].1.clone(),
                    shared: *shared,
                }
            })
            .collect();
        links.sort_by(|a, b| b.shared.cmp(&a.shared).then_with(|| a.path.cmp(&b.path)));
        links.truncate(options.max_links);
        if !links.is_empty() {
            result.insert(path.clone(), links);
        }
    }
    result
}

/// Replace the page's "See Also" section with the computed links. With no
/// links the stale section is simply removed.
pub fn apply_see_also(page: &WikiPage, links: &[SeeAlsoLink]) -> WikiPage {
    let body = remove_section(page.content(), SEE_ALSO_HEADING);
    if links.is_empty() {
        return page.clone().with_content(body);
    }

    let mut section = String::new();
    section.push_str(SEE_ALSO_HEADING);
    section.push_str("\n\n");
    for link in links {
        section.push_str(&format!(
            "- [{}]({}) ({} shared source files)\n",
            link.title,
            relative_wiki_path(page.path(), &link.path),
            link.shared
        ));
    }

    let mut content = body.trim_end().to_string();
    content.push_str("\n\n");
    content.push_str(section.trim_end());
    content.push('\n');
    page.clone().with_content(content)
}
