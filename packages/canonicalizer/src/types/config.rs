//! Configuration types for batching, retrieval, clustering and retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::triple::UNKNOWN_TYPE;

/// Configuration for the typing batch scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on the estimated prompt size of one batch.
    ///
    /// Counts the fixed prompt overhead plus every pending item.
    /// A single item larger than this still goes out, alone.
    pub max_input_tokens: usize,

    /// Estimated size of the fixed prompt (system prompt, label list).
    pub base_prompt_tokens: usize,

    /// Maximum number of items per batch.
    pub max_batch_size: usize,

    /// Label given to items the oracle failed on or silently omitted.
    pub fallback_label: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: 1400,
            base_prompt_tokens: 750,
            max_batch_size: 16,
            fallback_label: UNKNOWN_TYPE.to_string(),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token budget.
    pub fn with_max_input_tokens(mut self, max: usize) -> Self {
        self.max_input_tokens = max;
        self
    }

    /// Set the fixed prompt overhead.
    pub fn with_base_prompt_tokens(mut self, tokens: usize) -> Self {
        self.base_prompt_tokens = tokens;
        self
    }

    /// Set the item-count ceiling (at least 1).
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_fallback_label(mut self, label: impl Into<String>) -> Self {
        self.fallback_label = label.into();
        self
    }
}

/// Configuration for hybrid (BM25 + embedding) candidate retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum candidates returned per query.
    pub top_k: usize,

    /// Hard gate on embedding cosine similarity.
    ///
    /// Applied independently of the combined rank.
    pub min_similarity: f32,

    /// Weight of the BM25 score in the combined rank.
    pub lexical_weight: f32,

    /// Weight of the cosine score in the combined rank.
    pub semantic_weight: f32,

    /// BM25 term-frequency saturation.
    pub bm25_k1: f32,

    /// BM25 length normalization.
    pub bm25_b: f32,

    /// Floor for negative IDF values, as a fraction of the mean IDF.
    pub bm25_epsilon: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 16,
            min_similarity: 0.75,
            lexical_weight: 0.5,
            semantic_weight: 0.5,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            bm25_epsilon: 0.25,
        }
    }
}

impl RetrievalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_min_similarity(mut self, min_sim: f32) -> Self {
        self.min_similarity = min_sim;
        self
    }

    /// Set the lexical/semantic weights.
    pub fn with_weights(mut self, lexical: f32, semantic: f32) -> Self {
        self.lexical_weight = lexical;
        self.semantic_weight = semantic;
        self
    }
}

/// Configuration for the greedy cluster builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Require the canonical label to be one of the cluster's members.
    ///
    /// When the oracle names a label outside `{seed} ∪ duplicates`, the
    /// label is matched to a member ignoring case and spacing, and falls back
    /// to the seed otherwise. When false, the oracle's label is used verbatim.
    pub require_member_canonical: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            require_member_canonical: true,
        }
    }
}

impl ClusterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept whatever canonical label the oracle returns.
    pub fn trust_oracle_canonical(mut self) -> Self {
        self.require_member_canonical = false;
        self
    }
}

/// Per-call timeout and retry behavior for oracle and embedding requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Base delay; attempt `n` waits `n * retry_delay_ms` before retrying.
    pub retry_delay_ms: u64,

    /// Lower bound on the scaled timeout.
    pub min_timeout_ms: u64,

    /// Upper bound on the scaled timeout.
    pub max_timeout_ms: u64,

    /// Timeout added per 1000 input characters.
    pub timeout_per_kchar_ms: u64,

    /// Slack added on top of the clamped timeout.
    pub timeout_grace_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 5_000,
            min_timeout_ms: 60_000,
            max_timeout_ms: 600_000,
            timeout_per_kchar_ms: 100_000,
            timeout_grace_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total attempts (at least 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Use one fixed timeout regardless of input size.
    pub fn with_fixed_timeout_ms(mut self, ms: u64) -> Self {
        self.min_timeout_ms = ms;
        self.max_timeout_ms = ms;
        self.timeout_grace_ms = 0;
        self
    }

    /// Deadline for one attempt on an input of `input_chars` characters.
    pub fn timeout_for(&self, input_chars: usize) -> Duration {
        let scaled = (input_chars as u64).saturating_mul(self.timeout_per_kchar_ms) / 1000;
        let clamped = scaled.clamp(self.min_timeout_ms, self.max_timeout_ms.max(self.min_timeout_ms));
        Duration::from_millis(clamped + self.timeout_grace_ms)
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(attempt as u64))
    }
}

/// Configuration for bounded concurrent fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Requests allowed in flight at once.
    pub max_in_flight: usize,

    pub retry: RetryPolicy,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl FanOutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the in-flight bound (at least 1).
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Top-level configuration for a canonicalization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonConfig {
    pub batch: BatchConfig,
    pub retrieval: RetrievalConfig,
    pub cluster: ClusterConfig,
    pub fanout: FanOutConfig,

    /// Collapse case-insensitive exact duplicate triples before typing.
    pub dedup_exact: bool,
}

impl Default for CanonConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            retrieval: RetrievalConfig::default(),
            cluster: ClusterConfig::default(),
            fanout: FanOutConfig::default(),
            dedup_exact: true,
        }
    }
}

impl CanonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_fanout(mut self, fanout: FanOutConfig) -> Self {
        self.fanout = fanout;
        self
    }

    /// Disable exact lexical dedup of raw rows.
    pub fn without_dedup(mut self) -> Self {
        self.dedup_exact = false;
        self
    }
}
