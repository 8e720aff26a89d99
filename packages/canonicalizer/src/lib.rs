//! LLM-Assisted Knowledge-Graph Canonicalization
//!
//! Takes raw `(head, relation, tail)` triples extracted from text and makes
//! their vocabulary consistent: every span gets a semantic type, and surface
//! forms that mean the same thing (`"USA"`, `"United States"`) are merged
//! under one canonical label.
//!
//! # Design Philosophy
//!
//! **"Retrieval proposes, the model confirms"**
//!
//! - Cheap hybrid retrieval (BM25 + embeddings) shortlists candidates
//! - An LLM oracle confirms every merge; nothing merges on similarity alone
//! - Merges never cross semantic type buckets
//! - Oracle failures degrade to "no merge" or a fallback label, never abort
//!
//! # Usage
//!
//! ```rust,ignore
//! use canonicalizer::{Canonicalizer, CanonConfig};
//! use canonicalizer::testing::{MockEmbedder, MockOracle};
//!
//! let oracle = MockOracle::new();
//! let embedder = MockEmbedder::new();
//! let canon = Canonicalizer::new(&oracle, &embedder, CanonConfig::default());
//!
//! let output = canon.run_rows(rows).await;
//! for (alias, canonical) in output.canonical.resolver.entities().iter() {
//!     println!("{alias} -> {canonical}");
//! }
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Oracle, Completion and Embedder abstractions
//! - [`types`] - Triple records, clusters, alias maps, configuration
//! - [`pipeline`] - Batching, retrieval, clustering and alias resolution
//! - [`oracle`] - LLM-backed oracle, OpenAI-compatible client, retries
//! - [`io`] - Rows and JSON Lines boundary files
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod io;
pub mod oracle;
pub mod pipeline;
pub mod testing;
pub mod text;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{CanonError, OracleError, OracleResult, Result};
pub use traits::{
    embedder::Embedder,
    oracle::{
        ClassifyItem, ClassifyLabel, Completion, CompletionRequest, DedupDecision, Message, Oracle,
        Role,
    },
};
pub use types::{
    cluster::{AliasMap, BucketKey, Cluster, ItemKind},
    config::{BatchConfig, CanonConfig, ClusterConfig, FanOutConfig, RetrievalConfig, RetryPolicy},
    triple::{RawRow, RawTriple, Span, Triple, TypedSpan, UNKNOWN_TYPE},
};

// Re-export pipeline components
pub use pipeline::{
    AliasResolver, BatchScheduler, CanonOutput, CanonReport, Canonicalizer, ClusterBuilder,
    EmbeddingCache, HybridRetriever, RowsOutput,
};

// Re-export oracle backends
pub use oracle::{LlmOracle, Retrying};

#[cfg(feature = "openai")]
pub use oracle::OpenAiClient;
