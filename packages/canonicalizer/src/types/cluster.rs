//! Clusters of duplicate surface forms and the alias maps built from them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

/// What kind of item is being canonicalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Entity,
    Relation,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Entity => "entity",
            ItemKind::Relation => "relation",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic type bucket a candidate pool belongs to.
///
/// Entities are bucketed by their type, relations by the ordered pair of
/// head and tail types. No merging ever crosses buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BucketKey {
    Entity(String),
    Relation { head_type: String, tail_type: String },
}

impl BucketKey {
    pub fn entity(entity_type: impl Into<String>) -> Self {
        Self::Entity(entity_type.into())
    }

    pub fn relation(head_type: impl Into<String>, tail_type: impl Into<String>) -> Self {
        Self::Relation {
            head_type: head_type.into(),
            tail_type: tail_type.into(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            BucketKey::Entity(_) => ItemKind::Entity,
            BucketKey::Relation { .. } => ItemKind::Relation,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Entity(t) => write!(f, "entity:{}", t),
            BucketKey::Relation {
                head_type,
                tail_type,
            } => write!(f, "relation:{}->{}", head_type, tail_type),
        }
    }
}

/// A set of duplicate surface forms with one representative label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub canonical: String,
    pub members: BTreeSet<String>,
}

impl Cluster {
    pub fn new(
        canonical: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            canonical: canonical.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, text: &str) -> bool {
        self.members.contains(text)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Flattened surface form → canonical label lookup.
///
/// Lookups that miss return the input unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasMap {
    entries: IndexMap<String, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten clusters into `alias -> canonical` for every member.
    ///
    /// Members equal to their canonical label are skipped (lookups that miss
    /// are the identity anyway). When two clusters claim the same alias, the
    /// first one wins.
    pub fn from_clusters<'a>(clusters: impl IntoIterator<Item = &'a Cluster>) -> Self {
        let mut map = Self::new();
        for cluster in clusters {
            for member in &cluster.members {
                if *member == cluster.canonical {
                    continue;
                }
                if !map.insert(member.clone(), cluster.canonical.clone()) {
                    warn!(
                        alias = %member,
                        canonical = %cluster.canonical,
                        kept = %map.resolve(member),
                        "Alias already mapped, keeping first mapping"
                    );
                }
            }
        }
        map
    }

    /// Insert a mapping unless the alias is already present.
    ///
    /// Returns false when the alias was already mapped.
    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) -> bool {
        match self.entries.entry(alias.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(canonical.into());
                true
            }
        }
    }

    pub fn get(&self, text: &str) -> Option<&str> {
        self.entries.get(text).map(String::as_str)
    }

    /// Canonical form of `text`, or `text` itself when unmapped.
    pub fn resolve<'a>(&'a self, text: &'a str) -> &'a str {
        self.get(text).unwrap_or(text)
    }

    /// True when resolving twice never differs from resolving once.
    pub fn is_stable(&self) -> bool {
        self.entries
            .values()
            .all(|canonical| self.resolve(canonical) == canonical)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
