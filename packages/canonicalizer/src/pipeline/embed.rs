//! Per-run embedding cache.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::pipeline::fanout::fan_out;
use crate::text::normalize;
use crate::traits::embedder::Embedder;
use crate::types::config::FanOutConfig;
use crate::types::triple::Triple;

/// Outcome of one [`EmbeddingCache::fill`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedStats {
    /// Unique texts that were not cached yet
    pub requested: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Normalized text → embedding vector.
///
/// Each text is embedded at most once per run. A vector, once stored, is
/// never replaced.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingCache {
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str) -> Option<&[f32]> {
        self.vectors.get(&normalize(text)).map(Vec::as_slice)
    }

    pub fn contains(&self, text: &str) -> bool {
        self.vectors.contains_key(&normalize(text))
    }

    /// Store a vector unless the text already has one. Returns true if stored.
    pub fn insert(&mut self, text: &str, vector: Vec<f32>) -> bool {
        let key = normalize(text);
        if key.is_empty() || self.vectors.contains_key(&key) {
            return false;
        }
        self.vectors.insert(key, vector);
        true
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Adopt vectors already carried on input triples.
    ///
    /// Returns how many new vectors were stored.
    pub fn adopt_from_triples(&mut self, triples: &[Triple]) -> usize {
        let mut adopted = 0;
        for triple in triples {
            let carried = [
                (triple.head.text.as_str(), triple.head.embedding.as_ref()),
                (triple.tail.text.as_str(), triple.tail.embedding.as_ref()),
                (triple.relation.as_str(), triple.relation_embedding.as_ref()),
            ];
            for (text, vector) in carried {
                if let Some(vector) = vector {
                    if self.insert(text, vector.clone()) {
                        adopted += 1;
                    }
                }
            }
        }
        adopted
    }

    /// Embed every text that is not cached yet.
    ///
    /// Requests run concurrently through [`fan_out`]. Texts whose embedding
    /// fails stay uncached; the run carries on without them.
    pub async fn fill<'t, E>(
        &mut self,
        embedder: &E,
        texts: impl IntoIterator<Item = &'t str>,
        config: &FanOutConfig,
    ) -> EmbedStats
    where
        E: Embedder + ?Sized,
    {
        let mut seen = HashSet::new();
        let missing: Vec<String> = texts
            .into_iter()
            .map(normalize)
            .filter(|key| !key.is_empty() && !self.vectors.contains_key(key))
            .filter(|key| seen.insert(key.clone()))
            .collect();

        if missing.is_empty() {
            return EmbedStats::default();
        }

        let results = fan_out(&missing, config, move |_, text: &String| {
            let text = text.clone();
            async move { embedder.embed(&text).await }
        })
        .await;

        let mut stats = EmbedStats {
            requested: missing.len(),
            ..Default::default()
        };
        for (text, vector) in missing.into_iter().zip(results) {
            match vector {
                Some(vector) => {
                    self.vectors.insert(text, vector);
                    stats.embedded += 1;
                }
                None => {
                    warn!(text = %text, "No embedding, text will stay unmerged");
                    stats.failed += 1;
                }
            }
        }

        info!(
            requested = stats.requested,
            embedded = stats.embedded,
            failed = stats.failed,
            "Embedding cache filled"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbedder;
    use crate::types::config::RetryPolicy;
    use crate::types::triple::Span;

    fn config() -> FanOutConfig {
        FanOutConfig::new()
            .with_max_in_flight(4)
            .with_retry(RetryPolicy::new().with_max_attempts(1).with_fixed_timeout_ms(1_000))
    }

    #[tokio::test]
    async fn test_identical_texts_embedded_once() {
        let embedder = MockEmbedder::new();
        let mut cache = EmbeddingCache::new();

        let stats = cache
            .fill(&embedder, ["USA", "USA", " USA ", "France"], &config())
            .await;
        assert_eq!(stats.requested, 2);
        assert_eq!(stats.embedded, 2);
        assert_eq!(embedder.calls().len(), 2);

        // Second fill finds everything cached
        let stats = cache.fill(&embedder, ["France"], &config()).await;
        assert_eq!(stats, EmbedStats::default());
        assert_eq!(embedder.calls().len(), 2);
        assert!(cache.get("USA").is_some());
    }

    #[tokio::test]
    async fn test_failed_texts_stay_uncached() {
        let embedder = MockEmbedder::new().failing("broken");
        let mut cache = EmbeddingCache::new();

        let stats = cache.fill(&embedder, ["ok", "broken"], &config()).await;
        assert_eq!(stats.failed, 1);
        assert!(cache.contains("ok"));
        assert!(!cache.contains("broken"));
    }

    #[test]
    fn test_adopts_carried_vectors() {
        let triple = Triple::new(
            0,
            "triple_000001",
            Span::new("Paris", "City").with_embedding(vec![1.0, 0.0]),
            "capital of",
            Span::new("France", "Country"),
        )
        .with_relation_embedding(vec![0.0, 1.0]);

        let mut cache = EmbeddingCache::new();
        assert_eq!(cache.adopt_from_triples(&[triple.clone(), triple]), 2);
        assert_eq!(cache.get("Paris"), Some(&[1.0, 0.0][..]));
        assert_eq!(cache.get("capital of"), Some(&[0.0, 1.0][..]));
        assert!(!cache.contains("France"));
    }

    #[test]
    fn test_insert_is_write_once() {
        let mut cache = EmbeddingCache::new();
        assert!(cache.insert("a", vec![1.0]));
        assert!(!cache.insert(" a", vec![2.0]));
        assert_eq!(cache.get("a"), Some(&[1.0][..]));
        assert!(!cache.insert("   ", vec![1.0]));
    }
}
