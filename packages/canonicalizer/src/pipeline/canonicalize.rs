//! End-to-end canonicalization run.
//!
//! ```text
//! raw rows ──dedup──► focus spans ──BatchScheduler──► typed triples
//!     typed triples ──embed──► pools ──ClusterBuilder──► clusters
//!     clusters ──AliasResolver──► canonical triples ──► rows
//! ```
//!
//! Buckets are processed one after another. Within a bucket the cluster
//! builder is strictly sequential, since every merge changes what later seeds
//! may retrieve.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline::alias::AliasResolver;
use crate::pipeline::batch::{BatchScheduler, BatchStats};
use crate::pipeline::cluster::ClusterBuilder;
use crate::pipeline::embed::{EmbedStats, EmbeddingCache};
use crate::pipeline::pools::CandidatePools;
use crate::pipeline::stages::{assemble_triples, dedup_rows, focus_spans, restore_rows_to};
use crate::traits::embedder::Embedder;
use crate::traits::oracle::Oracle;
use crate::types::cluster::{Cluster, ItemKind};
use crate::types::config::CanonConfig;
use crate::types::triple::{RawRow, Triple, TypedSpan};

/// Run summary, written next to the output when a work directory is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonReport {
    pub rows: usize,
    pub triples: usize,
    pub exact_duplicates_dropped: usize,

    pub typing_requests: usize,
    pub typing_batches: usize,
    pub typing_cache_hits: usize,
    pub typing_fallbacks: usize,
    pub typing_failures: usize,

    pub embeddings_adopted: usize,
    pub embeddings_requested: usize,
    pub embeddings_failed: usize,
    pub missing_embedding: usize,

    pub buckets: usize,
    pub entity_clusters: usize,
    pub relation_clusters: usize,
    pub merged_texts: usize,
    pub singletons: usize,
    pub judgments: usize,
    pub judge_failures: usize,

    pub entity_aliases: usize,
    pub relation_aliases: usize,
    pub triples_rewritten: usize,
}

impl CanonReport {
    fn record_typing(&mut self, stats: BatchStats) {
        self.typing_requests += stats.submitted;
        self.typing_batches += stats.batches;
        self.typing_cache_hits += stats.cache_hits;
        self.typing_fallbacks += stats.fallbacks;
        self.typing_failures += stats.oracle_failures;
    }

    fn record_embeddings(&mut self, adopted: usize, stats: EmbedStats) {
        self.embeddings_adopted += adopted;
        self.embeddings_requested += stats.requested;
        self.embeddings_failed += stats.failed;
    }
}

/// Output of [`Canonicalizer::canonicalize`].
#[derive(Debug, Clone)]
pub struct CanonOutput {
    /// Canonical triples, embeddings stripped
    pub triples: Vec<Triple>,
    pub entity_clusters: Vec<Cluster>,
    pub relation_clusters: Vec<Cluster>,
    pub resolver: AliasResolver,
    pub report: CanonReport,
}

/// Output of [`Canonicalizer::run_rows`].
#[derive(Debug, Clone)]
pub struct RowsOutput {
    /// One row per input row, in input order
    pub rows: Vec<RawRow>,
    /// Typed triples before canonicalization
    pub typed: Vec<Triple>,
    pub canonical: CanonOutput,
}

/// Drives typing, clustering and alias resolution for one run.
pub struct Canonicalizer<'a, O: Oracle + ?Sized, E: Embedder + ?Sized> {
    oracle: &'a O,
    embedder: &'a E,
    config: CanonConfig,
}

impl<'a, O: Oracle + ?Sized, E: Embedder + ?Sized> Canonicalizer<'a, O, E> {
    pub fn new(oracle: &'a O, embedder: &'a E, config: CanonConfig) -> Self {
        Self {
            oracle,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &CanonConfig {
        &self.config
    }

    /// Label every span through the batch scheduler.
    pub async fn type_spans(&self, spans: Vec<TypedSpan>) -> (Vec<TypedSpan>, BatchStats) {
        let mut scheduler = BatchScheduler::new(self.oracle, self.config.batch.clone());
        let labels = scheduler
            .classify_all(spans.iter().map(|span| span.text.clone()))
            .await;

        let typed = spans
            .into_iter()
            .zip(labels)
            .map(|(span, label)| TypedSpan {
                label: Some(label),
                ..span
            })
            .collect();
        (typed, scheduler.stats())
    }

    /// Merge duplicate entities and relations within each type bucket and
    /// rewrite the triples to their canonical labels.
    pub async fn canonicalize(&self, triples: Vec<Triple>) -> CanonOutput {
        let mut report = CanonReport {
            triples: triples.len(),
            ..Default::default()
        };
        self.canonicalize_into(triples, &mut report).await
    }

    async fn canonicalize_into(&self, triples: Vec<Triple>, report: &mut CanonReport) -> CanonOutput {
        let mut embeddings = EmbeddingCache::new();
        let adopted = embeddings.adopt_from_triples(&triples);
        let texts = triples.iter().flat_map(|t| {
            [t.head.text.as_str(), t.tail.text.as_str(), t.relation.as_str()]
        });
        let stats = embeddings
            .fill(self.embedder, texts, &self.config.fanout)
            .await;
        report.record_embeddings(adopted, stats);

        let pools = CandidatePools::from_triples(&triples, &embeddings);
        report.buckets = pools.len();
        report.missing_embedding = pools.stats().missing_embedding;

        let builder = ClusterBuilder::new(
            self.oracle,
            self.config.retrieval.clone(),
            self.config.cluster.clone(),
        );
        let mut entity_clusters = Vec::new();
        let mut relation_clusters = Vec::new();

        for (key, pool) in pools.buckets() {
            info!(bucket = %key, size = pool.len(), "Clustering bucket");
            let outcome = builder.build(pool, key.kind()).await;

            report.merged_texts += outcome.merged_texts();
            report.singletons += outcome.singletons.len();
            report.judgments += outcome.judged;
            report.judge_failures += outcome.oracle_failures;

            match key.kind() {
                ItemKind::Entity => entity_clusters.extend(outcome.clusters),
                ItemKind::Relation => relation_clusters.extend(outcome.clusters),
            }
        }
        report.entity_clusters = entity_clusters.len();
        report.relation_clusters = relation_clusters.len();

        let resolver = AliasResolver::from_clusters(&entity_clusters, &relation_clusters);
        report.entity_aliases = resolver.entities().len();
        report.relation_aliases = resolver.relations().len();

        let triples: Vec<Triple> = triples
            .into_iter()
            .map(|mut triple| {
                if resolver.resolve_in_place(&mut triple) {
                    report.triples_rewritten += 1;
                }
                triple.strip_embeddings()
            })
            .collect();

        info!(
            buckets = report.buckets,
            entity_clusters = report.entity_clusters,
            relation_clusters = report.relation_clusters,
            merged = report.merged_texts,
            rewritten = report.triples_rewritten,
            "Canonicalization complete"
        );

        CanonOutput {
            triples,
            entity_clusters,
            relation_clusters,
            resolver,
            report: report.clone(),
        }
    }

    /// Full run from raw rows to canonical rows.
    ///
    /// The output has exactly as many rows as the input, in the same order.
    pub async fn run_rows(&self, rows: Vec<RawRow>) -> RowsOutput {
        let row_count = rows.len();
        let mut report = CanonReport {
            rows: row_count,
            ..Default::default()
        };

        let rows = if self.config.dedup_exact {
            let (rows, dropped) = dedup_rows(rows);
            report.exact_duplicates_dropped = dropped;
            rows
        } else {
            rows
        };

        let spans = focus_spans(&rows);
        info!(rows = row_count, spans = spans.len(), "Typing spans");
        let (spans, typing) = self.type_spans(spans).await;
        report.record_typing(typing);

        let typed = assemble_triples(&spans);
        report.triples = typed.len();

        let canonical = self.canonicalize_into(typed.clone(), &mut report).await;
        let rows = restore_rows_to(&canonical.triples, row_count);

        RowsOutput {
            rows,
            typed,
            canonical,
        }
    }
}
