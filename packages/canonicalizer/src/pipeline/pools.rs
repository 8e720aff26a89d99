//! Candidate pools: texts and vectors grouped by semantic type bucket.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::pipeline::embed::EmbeddingCache;
use crate::types::cluster::{BucketKey, ItemKind};
use crate::types::triple::Triple;

/// One type bucket: text → embedding vector, in first-seen order.
///
/// Keys are unique, so exact duplicates collapse on insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePool {
    entries: IndexMap<String, Vec<f32>>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text unless it is already present. Returns true if added.
    pub fn insert(&mut self, text: impl Into<String>, vector: Vec<f32>) -> bool {
        match self.entries.entry(text.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(vector);
                true
            }
        }
    }

    pub fn get(&self, text: &str) -> Option<&[f32]> {
        self.entries.get(text).map(Vec::as_slice)
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries.contains_key(text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries.iter().map(|(t, v)| (t.as_str(), v.as_slice()))
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<f32>)> for CandidatePool {
    fn from_iter<I: IntoIterator<Item = (S, Vec<f32>)>>(iter: I) -> Self {
        let mut pool = Self::new();
        for (text, vector) in iter {
            pool.insert(text, vector);
        }
        pool
    }
}

/// Counters from building pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Texts left out because they have no embedding
    pub missing_embedding: usize,
    /// Occurrences ignored because the text already lives in another bucket
    pub cross_bucket: usize,
}

/// Every bucket of a run, entity and relation alike.
///
/// A text belongs to at most one bucket per item kind: the first bucket it
/// is seen in.
#[derive(Debug, Clone, Default)]
pub struct CandidatePools {
    buckets: IndexMap<BucketKey, CandidatePool>,
    homes: HashMap<(ItemKind, String), BucketKey>,
    stats: PoolStats,
}

impl CandidatePools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build entity buckets (by type) and relation buckets (by head/tail type
    /// pair) from typed triples and their cached embeddings.
    pub fn from_triples(triples: &[Triple], embeddings: &EmbeddingCache) -> Self {
        let mut pools = Self::new();
        for triple in triples {
            for span in [&triple.head, &triple.tail] {
                pools.add(BucketKey::entity(&span.entity_type), &span.text, embeddings);
            }
            let (head_type, tail_type) = triple.type_pair();
            pools.add(
                BucketKey::relation(head_type, tail_type),
                &triple.relation,
                embeddings,
            );
        }

        debug!(
            buckets = pools.buckets.len(),
            missing_embedding = pools.stats.missing_embedding,
            cross_bucket = pools.stats.cross_bucket,
            "Candidate pools built"
        );
        pools
    }

    fn add(&mut self, key: BucketKey, text: &str, embeddings: &EmbeddingCache) {
        let Some(vector) = embeddings.get(text) else {
            self.stats.missing_embedding += 1;
            return;
        };
        let vector = vector.to_vec();
        self.insert(key, text, vector);
    }

    /// Add a text to a bucket, honoring the one-bucket-per-kind rule.
    ///
    /// Returns false when the text was already present here or elsewhere.
    pub fn insert(&mut self, key: BucketKey, text: &str, vector: Vec<f32>) -> bool {
        let home = (key.kind(), text.to_string());
        if let Some(existing) = self.homes.get(&home) {
            if *existing != key {
                self.stats.cross_bucket += 1;
            }
            return false;
        }
        self.homes.insert(home, key.clone());
        self.buckets.entry(key).or_default().insert(text, vector)
    }

    pub fn bucket(&self, key: &BucketKey) -> Option<&CandidatePool> {
        self.buckets.get(key)
    }

    /// Buckets in first-seen order.
    pub fn buckets(&self) -> impl Iterator<Item = (&BucketKey, &CandidatePool)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::triple::Span;

    fn triple(head: (&str, &str), relation: &str, tail: (&str, &str)) -> Triple {
        Triple::new(
            0,
            "triple_000001",
            Span::new(head.0, head.1),
            relation,
            Span::new(tail.0, tail.1),
        )
    }

    fn cache(texts: &[&str]) -> EmbeddingCache {
        let mut cache = EmbeddingCache::new();
        for (i, text) in texts.iter().enumerate() {
            cache.insert(text, vec![i as f32, 1.0]);
        }
        cache
    }

    #[test]
    fn test_buckets_by_type() {
        let triples = vec![
            triple(("Paris", "City"), "capital of", ("France", "Country")),
            triple(("Berlin", "City"), "capital of", ("Germany", "Country")),
            triple(("Alice", "Person"), "lives in", ("Paris", "City")),
        ];
        let embeddings = cache(&["Paris", "France", "Berlin", "Germany", "Alice", "capital of", "lives in"]);

        let pools = CandidatePools::from_triples(&triples, &embeddings);

        let cities = pools.bucket(&BucketKey::entity("City")).unwrap();
        assert_eq!(cities.texts().collect::<Vec<_>>(), vec!["Paris", "Berlin"]);

        let rel = pools
            .bucket(&BucketKey::relation("City", "Country"))
            .unwrap();
        assert_eq!(rel.len(), 1);
        assert!(rel.contains("capital of"));

        assert!(pools.bucket(&BucketKey::relation("Person", "City")).is_some());
        assert_eq!(pools.len(), 5);
    }

    #[test]
    fn test_text_lives_in_first_bucket_only() {
        let triples = vec![
            triple(("Jordan", "Person"), "visited", ("Jordan", "Country")),
        ];
        let embeddings = cache(&["Jordan", "visited"]);

        let pools = CandidatePools::from_triples(&triples, &embeddings);
        assert!(pools.bucket(&BucketKey::entity("Person")).unwrap().contains("Jordan"));
        assert!(pools.bucket(&BucketKey::entity("Country")).is_none());
        assert_eq!(pools.stats().cross_bucket, 1);
    }

    #[test]
    fn test_texts_without_embedding_left_out() {
        let triples = vec![triple(("Paris", "City"), "capital of", ("France", "Country"))];
        let embeddings = cache(&["Paris", "capital of"]);

        let pools = CandidatePools::from_triples(&triples, &embeddings);
        assert_eq!(pools.stats().missing_embedding, 1);
        assert!(pools.bucket(&BucketKey::entity("Country")).is_none());
    }

    #[test]
    fn test_pool_from_iter_dedups() {
        let pool: CandidatePool = vec![("a", vec![1.0]), ("b", vec![2.0]), ("a", vec![3.0])]
            .into_iter()
            .collect();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get("a"), Some(&[1.0][..]));
    }
}
