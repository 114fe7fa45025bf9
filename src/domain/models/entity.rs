use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::ChunkKind;

/// A named declaration indexed for cross-linking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    name: String,
    kind: ChunkKind,
    wiki_path: String,
    defining_file: String,
    aliases: Vec<String>,
}

impl Entity {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn wiki_path(&self) -> &str {
        &self.wiki_path
    }

    pub fn defining_file(&self) -> &str {
        &self.defining_file
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }
}

/// Registry of linkable entities, indexed by name.
///
/// Pages reference entities by name only; the registry is the single owner
/// of entity records, so no cyclic page/entity references can form.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Entity>,
    blocklist: HashSet<String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocklist<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entities: BTreeMap::new(),
            blocklist: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Register a named declaration. Names of two characters or fewer,
    /// underscore-prefixed names and block-listed names are skipped.
    /// The first registration of a name wins.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: ChunkKind,
        wiki_path: impl Into<String>,
        defining_file: impl Into<String>,
    ) -> bool {
        let name = name.into();
        if !Self::is_linkable_name(&name) || self.blocklist.contains(&name) {
            return false;
        }
        if self.entities.contains_key(&name) {
            return false;
        }

        let aliases = spaced_alias(&name).into_iter().collect();
        self.entities.insert(
            name.clone(),
            Entity {
                name,
                kind,
                wiki_path: wiki_path.into(),
                defining_file: defining_file.into(),
                aliases,
            },
        );
        true
    }

    fn is_linkable_name(name: &str) -> bool {
        name.len() > 2 && !name.starts_with('_')
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// All (pattern, entity) pairs the weaver should match, longest pattern
    /// first so longer names win over their prefixes.
    pub fn link_patterns(&self) -> Vec<(&str, &Entity)> {
        let mut patterns: Vec<(&str, &Entity)> = Vec::new();
        for entity in self.entities.values() {
            patterns.push((entity.name.as_str(), entity));
            for alias in &entity.aliases {
                patterns.push((alias.as_str(), entity));
            }
        }
        patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        patterns
    }
}

/// Derive the spaced form of a camel-case identifier: `VectorStore`
/// becomes "Vector Store". Returns `None` when the name has fewer than
/// two camel-case segments.
fn spaced_alias(name: &str) -> Option<String> {
    if name.contains('_') || name.contains(' ') {
        return None;
    }

    let mut spaced = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                spaced.push(' ');
            }
            prev_lower = false;
        } else {
            prev_lower = true;
        }
        spaced.push(c);
    }

    // A space was inserted only when a lowercase-to-uppercase boundary
    // exists, which is what distinguishes camel case from acronym runs.
    if spaced.contains(' ') {
        Some(spaced)
    } else {
        None
    }
}
