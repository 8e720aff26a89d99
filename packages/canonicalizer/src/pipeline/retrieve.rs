//! Hybrid candidate retrieval.
//!
//! Ranks a candidate pool against a query by a weighted sum of BM25 (with
//! the pool as corpus) and embedding cosine similarity. Cosine similarity is
//! also a hard gate: a candidate below `min_similarity` is never returned,
//! however high its combined score.

use crate::pipeline::lexical::{Bm25, Bm25Params};
use crate::text::tokenize;
use crate::types::config::RetrievalConfig;

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths, empty vectors, or zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// A pool entry that survived ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    /// Position in the pool slices passed to [`HybridRetriever::rank`]
    pub index: usize,
    /// Combined lexical + semantic score
    pub score: f32,
    /// Cosine similarity to the query
    pub similarity: f32,
}

/// Hybrid BM25 + embedding retriever.
#[derive(Debug, Clone, Default)]
pub struct HybridRetriever {
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn bm25_params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.config.bm25_k1,
            b: self.config.bm25_b,
            epsilon: self.config.bm25_epsilon,
        }
    }

    /// Rank pool entries for `query`, best first.
    ///
    /// `texts[i]` and `vectors[i]` describe the same entry. Entries equal to
    /// the query text are excluded before truncating to `top_k`, so the query
    /// never takes a slot. The result respects the similarity gate.
    pub fn rank<T, V>(
        &self,
        query: &str,
        query_vec: &[f32],
        texts: &[T],
        vectors: &[V],
    ) -> Vec<ScoredCandidate>
    where
        T: AsRef<str>,
        V: AsRef<[f32]>,
    {
        debug_assert_eq!(texts.len(), vectors.len());
        if texts.is_empty() || self.config.top_k == 0 {
            return Vec::new();
        }

        let corpus: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t.as_ref())).collect();
        let lexical = Bm25::new(&corpus, self.bm25_params()).scores(&tokenize(query));

        let mut scored: Vec<ScoredCandidate> = texts
            .iter()
            .zip(vectors)
            .zip(lexical)
            .enumerate()
            .filter(|(_, ((text, _), _))| text.as_ref() != query)
            .map(|(index, ((_, vector), bm25))| {
                let similarity = cosine_similarity(query_vec, vector.as_ref());
                ScoredCandidate {
                    index,
                    score: self.config.lexical_weight * bm25
                        + self.config.semantic_weight * similarity,
                    similarity,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        scored
            .into_iter()
            .filter(|c| c.similarity >= self.config.min_similarity)
            .take(self.config.top_k)
            .collect()
    }

    /// Top candidate texts for `query`, best first.
    pub fn top_k<T, V>(&self, query: &str, query_vec: &[f32], texts: &[T], vectors: &[V]) -> Vec<String>
    where
        T: AsRef<str>,
        V: AsRef<[f32]>,
    {
        self.rank(query, query_vec, texts, vectors)
            .into_iter()
            .map(|c| texts[c.index].as_ref().to_string())
            .collect()
    }
}
