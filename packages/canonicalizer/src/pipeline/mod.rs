//! Canonicalization pipeline.
//!
//! Bottom-up: lenient decoding of model replies, lexical and hybrid
//! retrieval, batch typing, concurrent fan-out, embedding cache, type-bucketed
//! candidate pools, greedy clustering, alias resolution, and the end-to-end
//! [`Canonicalizer`].

pub mod alias;
pub mod batch;
pub mod canonicalize;
pub mod cluster;
pub mod decode;
pub mod embed;
pub mod fanout;
pub mod lexical;
pub mod pools;
pub mod prompts;
pub mod retrieve;
pub mod stages;

pub use alias::AliasResolver;
pub use batch::{BatchScheduler, BatchStats, LabelCache, Labeled};
pub use canonicalize::{CanonOutput, CanonReport, Canonicalizer, RowsOutput};
pub use cluster::{BucketOutcome, ClusterBuilder, InsertionOrder, ScriptedOrder, SeedPicker};
pub use decode::{decode_array, decode_object, DecodeStage, Decoded};
pub use embed::{EmbedStats, EmbeddingCache};
pub use fanout::{fan_out, InputSize};
pub use pools::{CandidatePool, CandidatePools};
pub use retrieve::{cosine_similarity, HybridRetriever, ScoredCandidate};
