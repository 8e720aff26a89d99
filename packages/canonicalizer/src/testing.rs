//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the canonicalization
//! library without making real LLM or network calls.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{OracleError, OracleResult};
use crate::traits::{
    embedder::Embedder,
    oracle::{ClassifyItem, ClassifyLabel, Completion, CompletionRequest, DedupDecision, Oracle},
};
use crate::types::cluster::ItemKind;

/// Scripted judgment function.
pub type JudgeFn = dyn Fn(&str, &[String], ItemKind) -> DedupDecision + Send + Sync;

/// A mock oracle for testing.
///
/// Classification answers from a text → label table (unknown texts get
/// [`MockOracle::DEFAULT_LABEL`]). Judgment answers from a seed → decision
/// table, a judge function, or refuses.
#[derive(Default)]
pub struct MockOracle {
    /// Predefined labels by text
    labels: Arc<RwLock<HashMap<String, String>>>,

    /// Texts left out of classification replies
    omitted: Arc<RwLock<HashSet<String>>>,

    /// Predefined decisions by seed
    decisions: Arc<RwLock<HashMap<String, DedupDecision>>>,

    /// Seeds whose judgment fails
    failing_seeds: Arc<RwLock<HashSet<String>>>,

    /// Fallback judge for seeds without a predefined decision
    judge_fn: Option<Arc<JudgeFn>>,

    fail_classify: bool,
    fail_judge: bool,

    /// Calls that fail before the mock starts answering
    transient_failures: Arc<AtomicUsize>,

    /// Artificial latency per call
    delay: Option<Duration>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockOracleCall>>>,
}

/// Record of a call made to the mock oracle.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOracleCall {
    Classify { items: Vec<ClassifyItem> },
    Judge(JudgeCall),
}

/// Arguments of one judgment call.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeCall {
    pub seed: String,
    pub candidates: Vec<String>,
    pub kind: ItemKind,
}

impl MockOracle {
    /// Label given to texts without a predefined label.
    pub const DEFAULT_LABEL: &'static str = "Thing";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predefined label for a text.
    pub fn with_label(self, text: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.write().unwrap().insert(text.into(), label.into());
        self
    }

    /// Leave a text out of classification replies.
    pub fn omitting(self, text: impl Into<String>) -> Self {
        self.omitted.write().unwrap().insert(text.into());
        self
    }

    /// Add a predefined decision for a seed.
    pub fn with_decision(self, seed: impl Into<String>, decision: DedupDecision) -> Self {
        self.decisions.write().unwrap().insert(seed.into(), decision);
        self
    }

    /// Judge seeds without a predefined decision with `f`.
    pub fn with_judge_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &[String], ItemKind) -> DedupDecision + Send + Sync + 'static,
    {
        self.judge_fn = Some(Arc::new(f));
        self
    }

    /// Make judgment fail for one seed.
    pub fn failing_seed(self, seed: impl Into<String>) -> Self {
        self.failing_seeds.write().unwrap().insert(seed.into());
        self
    }

    /// Make every classification call fail.
    pub fn failing_classify(mut self) -> Self {
        self.fail_classify = true;
        self
    }

    /// Make every judgment call fail.
    pub fn failing_judge(mut self) -> Self {
        self.fail_judge = true;
        self
    }

    /// Fail the first `n` calls with a transport error.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockOracleCall> {
        self.calls.read().unwrap().clone()
    }

    /// Batches sent to `classify`, in call order.
    pub fn classify_calls(&self) -> Vec<Vec<ClassifyItem>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockOracleCall::Classify { items } => Some(items),
                MockOracleCall::Judge(_) => None,
            })
            .collect()
    }

    /// Arguments sent to `judge`, in call order.
    pub fn judge_calls(&self) -> Vec<JudgeCall> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockOracleCall::Judge(call) => Some(call),
                MockOracleCall::Classify { .. } => None,
            })
            .collect()
    }

    async fn before_call(&self) -> OracleResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(OracleError::Transport("mock transient failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn classify(&self, batch: &[ClassifyItem]) -> OracleResult<Vec<ClassifyLabel>> {
        self.calls.write().unwrap().push(MockOracleCall::Classify {
            items: batch.to_vec(),
        });
        self.before_call().await?;

        if self.fail_classify {
            return Err(OracleError::Malformed("mock classification failure".into()));
        }

        let labels = self.labels.read().unwrap();
        let omitted = self.omitted.read().unwrap();
        Ok(batch
            .iter()
            .filter(|item| !omitted.contains(&item.text))
            .map(|item| {
                let label = labels
                    .get(&item.text)
                    .cloned()
                    .unwrap_or_else(|| Self::DEFAULT_LABEL.to_string());
                ClassifyLabel::new(item.local_id, label)
            })
            .collect())
    }

    async fn judge(
        &self,
        seed: &str,
        candidates: &[String],
        kind: ItemKind,
    ) -> OracleResult<DedupDecision> {
        self.calls.write().unwrap().push(MockOracleCall::Judge(JudgeCall {
            seed: seed.to_string(),
            candidates: candidates.to_vec(),
            kind,
        }));
        self.before_call().await?;

        if self.fail_judge || self.failing_seeds.read().unwrap().contains(seed) {
            return Err(OracleError::Malformed("mock judgment failure".into()));
        }

        if let Some(decision) = self.decisions.read().unwrap().get(seed) {
            return Ok(decision.clone());
        }

        Ok(match &self.judge_fn {
            Some(f) => f(seed, candidates, kind),
            None => DedupDecision::refusal(),
        })
    }
}

/// A mock embedder for testing.
///
/// Unknown texts get a deterministic hash-derived embedding.
#[derive(Default)]
pub struct MockEmbedder {
    /// Predefined embeddings by text
    embeddings: Arc<RwLock<HashMap<String, Vec<f32>>>>,

    /// Texts whose embedding fails
    failing: Arc<RwLock<HashSet<String>>>,

    /// Default embedding dimension
    embedding_dim: usize,

    /// Texts embedded, in call order
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            embedding_dim: 64,
            ..Default::default()
        }
    }

    /// Set the embedding dimension.
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Add a predefined embedding for text.
    pub fn with_embedding(self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings
            .write()
            .unwrap()
            .insert(text.into(), embedding);
        self
    }

    /// Make embedding fail for one text.
    pub fn failing(self, text: impl Into<String>) -> Self {
        self.failing.write().unwrap().insert(text.into());
        self
    }

    /// Get all texts embedded so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    /// Generate a deterministic embedding based on text.
    fn generate_deterministic_embedding(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();

        // Use hash bytes to seed a deterministic embedding
        (0..self.embedding_dim)
            .map(|i| {
                let byte_idx = i % 32;
                let byte = hash[byte_idx] as f32;
                // Normalize to [-1, 1] range
                (byte / 127.5) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> OracleResult<Vec<f32>> {
        self.calls.write().unwrap().push(text.to_string());

        if self.failing.read().unwrap().contains(text) {
            return Err(OracleError::Api("mock embedding failure".into()));
        }

        if let Some(embedding) = self.embeddings.read().unwrap().get(text) {
            return Ok(embedding.clone());
        }

        Ok(self.generate_deterministic_embedding(text))
    }
}

/// A completion backend that replays scripted replies in order.
///
/// Once the script runs out every call fails with a transport error.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Arc<RwLock<VecDeque<OracleResult<String>>>>,
    requests: Arc<RwLock<Vec<CompletionRequest>>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.replies.write().unwrap().push_back(Ok(reply.into()));
        self
    }

    /// Queue a failed call.
    pub fn with_error(self, error: OracleError) -> Self {
        self.replies.write().unwrap().push_back(Err(error));
        self
    }

    /// Requests received, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.read().unwrap().clone()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> OracleResult<String> {
        self.requests.write().unwrap().push(request.clone());
        self.replies
            .write()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Transport("no scripted reply left".into())))
    }
}
