//! Weaver pipeline tests: the exact bold/inline-code rewrite, fence and
//! link safety, and the fixpoint property across the combined weaves.

use std::collections::BTreeMap;

use repowiki::{
    apply_see_also, compute_see_also, weave_cross_links, weave_source_refs, ChunkKind,
    EntityRegistry, LineRange, SeeAlsoOptions, WikiPage,
};

fn registry() -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    registry.register(
        "VectorStore",
        ChunkKind::Class,
        "vectorstore.md",
        "store.py",
    );
    registry.register(
        "chunk_file",
        ChunkKind::Function,
        "files/chunker.py.md",
        "chunker.py",
    );
    registry
}

fn page(path: &str, content: &str) -> WikiPage {
    WikiPage::new(path.to_string(), "Title".to_string(), content.to_string(), 7)
}

#[test]
fn test_bold_and_backtick_rewrite() {
    let input = page(
        "other.md",
        "The **Vector Store** uses `VectorStore` internally.\n",
    );
    let woven = weave_cross_links(&input, &registry());
    assert_eq!(
        woven.content(),
        "The **[Vector Store](vectorstore.md)** uses [`VectorStore`](vectorstore.md) internally.\n"
    );
}

#[test]
fn test_no_rewrite_inside_fences_code_or_links() {
    let content = "\
Intro mentioning VectorStore.

```python
store = VectorStore()
chunk_file(path)
```

Inline `chunk_file(path)` stays, but chunk_file links.
See [VectorStore guide](guide.md).
";
    let woven = weave_cross_links(&page("other.md", content), &registry());
    let woven = woven.content();

    assert!(woven.contains("Intro mentioning [VectorStore](vectorstore.md)."));
    assert!(woven.contains("store = VectorStore()"));
    assert!(woven.contains("chunk_file(path)\n```"));
    // The inline code span is not an exact entity name, so it is untouched.
    assert!(woven.contains("Inline `chunk_file(path)` stays"));
    assert!(woven.contains("but [chunk_file](files/chunker.py.md) links"));
    assert!(woven.contains("[VectorStore guide](guide.md)"));
}

#[test]
fn test_combined_weave_is_fixpoint() {
    let registry = registry();
    let file_pages = BTreeMap::from([
        ("store.py".to_string(), "files/store.py.md".to_string()),
        ("chunker.py".to_string(), "files/chunker.py.md".to_string()),
    ]);
    let line_info = BTreeMap::from([(
        "store.py".to_string(),
        LineRange { start: 1, end: 88 },
    )]);
    let sources = vec!["store.py".to_string(), "chunker.py".to_string()];

    let base = page(
        "modules/core.md",
        "# Core\n\nThe VectorStore persists what chunk_file produces.\n",
    );

    let weave_all = |p: &WikiPage| {
        let p = weave_cross_links(p, &registry);
        let p = weave_source_refs(&p, &sources, Some(&line_info), &file_pages);
        apply_see_also(
            &p,
            &[repowiki::SeeAlsoLink {
                path: "modules/api.md".to_string(),
                title: "api".to_string(),
                shared: 2,
            }],
        )
    };

    let once = weave_all(&base);
    let twice = weave_all(&once);
    assert_eq!(once.content(), twice.content());

    let content = once.content();
    assert!(content.contains("[VectorStore](../vectorstore.md)"));
    assert!(content.contains("## Relevant Source Files"));
    assert!(content.contains("- [`store.py`](../files/store.py.md) (lines 1-88)"));
    assert!(content.contains("## See Also"));
    assert!(content.contains("- [api](api.md) (2 shared source files)"));

    // Source refs precede see-also.
    assert!(content.find("## Relevant Source Files").unwrap() < content.find("## See Also").unwrap());
}

#[test]
fn test_see_also_threshold_and_cap() {
    let pages: Vec<(String, String, Vec<String>)> = vec![
        (
            "a.md".into(),
            "a".into(),
            vec!["x.rs".into(), "y.rs".into(), "z.rs".into()],
        ),
        ("b.md".into(), "b".into(), vec!["x.rs".into(), "y.rs".into()]),
        ("c.md".into(), "c".into(), vec!["x.rs".into()]),
    ];

    let links = compute_see_also(&pages, &SeeAlsoOptions::default());
    assert!(links.get("a.md").unwrap().iter().any(|l| l.path == "b.md"));
    assert!(links.get("b.md").unwrap().iter().any(|l| l.path == "a.md"));
    // c shares only one file with anything, below the threshold of two.
    assert!(!links.contains_key("c.md"));
}

#[test]
fn test_entity_exclusion_rules_apply_to_weaving() {
    let mut registry = EntityRegistry::with_blocklist(["main"]);
    registry.register("db", ChunkKind::Constant, "db.md", "db.py");
    registry.register("_private", ChunkKind::Function, "p.md", "p.py");
    registry.register("main", ChunkKind::Function, "m.md", "m.py");
    registry.register("Indexer", ChunkKind::Class, "indexer.md", "indexer.py");

    let woven = weave_cross_links(
        &page("other.md", "db and _private and main and Indexer.\n"),
        &registry,
    );
    assert_eq!(
        woven.content(),
        "db and _private and main and [Indexer](indexer.md).\n"
    );
}

#[test]
fn test_weaving_without_entities_is_identity() {
    let registry = EntityRegistry::new();
    let original = "Plain **bold** and `code` and [link](x.md).\n";
    let woven = weave_cross_links(&page("p.md", original), &registry);
    assert_eq!(woven.content(), original);
}
