//! Rewrites triples to canonical labels.

use crate::types::cluster::{AliasMap, Cluster};
use crate::types::triple::Triple;

/// Applies entity and relation alias maps to a triple stream.
///
/// Head and tail text go through the entity map, the relation through the
/// relation map. Texts missing from a map are left unchanged. Types,
/// ids and embeddings are never touched.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    entities: AliasMap,
    relations: AliasMap,
}

impl AliasResolver {
    pub fn new(entities: AliasMap, relations: AliasMap) -> Self {
        Self {
            entities,
            relations,
        }
    }

    pub fn from_clusters(entity_clusters: &[Cluster], relation_clusters: &[Cluster]) -> Self {
        Self::new(
            AliasMap::from_clusters(entity_clusters),
            AliasMap::from_clusters(relation_clusters),
        )
    }

    pub fn entities(&self) -> &AliasMap {
        &self.entities
    }

    pub fn relations(&self) -> &AliasMap {
        &self.relations
    }

    /// Rewrite one triple. Returns true if any text changed.
    pub fn resolve_in_place(&self, triple: &mut Triple) -> bool {
        let mut changed = false;
        changed |= rewrite(&self.entities, &mut triple.head.text);
        changed |= rewrite(&self.entities, &mut triple.tail.text);
        changed |= rewrite(&self.relations, &mut triple.relation);
        changed
    }

    /// Rewrite every triple of a stream.
    pub fn apply(&self, triples: impl IntoIterator<Item = Triple>) -> Vec<Triple> {
        triples
            .into_iter()
            .map(|mut triple| {
                self.resolve_in_place(&mut triple);
                triple
            })
            .collect()
    }
}

fn rewrite(map: &AliasMap, text: &mut String) -> bool {
    match map.get(text.as_str()) {
        Some(canonical) if canonical != text.as_str() => {
            *text = canonical.to_string();
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::triple::Span;

    fn triple(head: &str, relation: &str, tail: &str) -> Triple {
        Triple::new(
            0,
            "triple_000001",
            Span::new(head, "Thing"),
            relation,
            Span::new(tail, "Thing"),
        )
    }

    fn resolver() -> AliasResolver {
        AliasResolver::from_clusters(
            &[Cluster::new("USA", ["USA", "United States"])],
            &[Cluster::new("located in", ["located in", "is located in"])],
        )
    }

    #[test]
    fn test_rewrites_entities_and_relations() {
        let resolved = resolver().apply(vec![triple("Boston", "is located in", "United States")]);

        assert_eq!(resolved[0].head.text, "Boston");
        assert_eq!(resolved[0].relation, "located in");
        assert_eq!(resolved[0].tail.text, "USA");
        assert_eq!(resolved[0].tail.entity_type, "Thing");
    }

    #[test]
    fn test_maps_do_not_cross_kinds() {
        // An entity alias appearing as a relation is left alone
        let resolved = resolver().apply(vec![triple("is located in", "United States", "x")]);
        assert_eq!(resolved[0].head.text, "is located in");
        assert_eq!(resolved[0].relation, "United States");
    }

    #[test]
    fn test_second_pass_is_noop() {
        let resolver = resolver();
        let once = resolver.apply(vec![
            triple("United States", "is located in", "France"),
            triple("USA", "borders", "Canada"),
        ]);
        let twice = resolver.apply(once.clone());
        assert_eq!(once, twice);

        let mut again = once[0].clone();
        assert!(!resolver.resolve_in_place(&mut again));
    }
}
