//! Embedding trait.

use async_trait::async_trait;

use crate::error::OracleResult;

/// Text → fixed-length vector.
///
/// Must be deterministic for identical input within a run: the
/// embedding cache stores one vector per text and never asks again.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for one text.
    async fn embed(&self, text: &str) -> OracleResult<Vec<f32>>;
}
