//! Greedy duplicate clustering within one type bucket.
//!
//! The bucket is copied into an arena of texts and vectors, with a set of
//! live ("remaining") indices. Each round:
//!
//! 1. a seed is picked from the remaining indices
//! 2. its shortlist is retrieved from the remaining pool
//! 3. an empty shortlist drops the seed as a singleton
//! 4. otherwise the oracle judges seed + shortlist; a confirmed merge removes
//!    the seed and every accepted duplicate, anything else drops the seed
//!
//! Every text leaves the remaining set exactly once, so the clusters and
//! singletons of a bucket partition it. Seeds are never revisited.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::{debug, info, warn};

use crate::pipeline::pools::CandidatePool;
use crate::pipeline::retrieve::HybridRetriever;
use crate::text::normalize;
use crate::traits::oracle::{DedupDecision, Oracle};
use crate::types::cluster::{Cluster, ItemKind};
use crate::types::config::{ClusterConfig, RetrievalConfig};

/// Chooses the next seed.
///
/// `remaining` is never empty when called. Returning an index outside
/// `remaining` makes the builder fall back to the lowest remaining index.
pub trait SeedPicker: Send {
    fn pick(&mut self, remaining: &BTreeSet<usize>, texts: &[&str]) -> usize;
}

/// Seeds in pool insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertionOrder;

impl SeedPicker for InsertionOrder {
    fn pick(&mut self, remaining: &BTreeSet<usize>, _texts: &[&str]) -> usize {
        remaining.first().copied().unwrap_or_default()
    }
}

/// Seeds in a caller-given order of texts.
///
/// Scripted texts already removed (or unknown) are skipped; once the script
/// runs out, seeding continues in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOrder {
    order: VecDeque<String>,
}

impl ScriptedOrder {
    pub fn new(order: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            order: order.into_iter().map(Into::into).collect(),
        }
    }
}

impl SeedPicker for ScriptedOrder {
    fn pick(&mut self, remaining: &BTreeSet<usize>, texts: &[&str]) -> usize {
        while let Some(next) = self.order.pop_front() {
            if let Some(index) = remaining.iter().copied().find(|&i| texts[i] == next) {
                return index;
            }
        }
        InsertionOrder.pick(remaining, texts)
    }
}

/// Result of clustering one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketOutcome {
    pub clusters: Vec<Cluster>,
    /// Seeds dropped without a merge, in drop order
    pub singletons: Vec<String>,
    /// Oracle judgments requested
    pub judged: usize,
    /// Judgments that failed and were treated as refusals
    pub oracle_failures: usize,
}

impl BucketOutcome {
    /// Texts absorbed into clusters.
    pub fn merged_texts(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }
}

/// Builds duplicate clusters with retrieval proposals and oracle confirmation.
pub struct ClusterBuilder<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    retriever: HybridRetriever,
    config: ClusterConfig,
}

impl<'a, O: Oracle + ?Sized> ClusterBuilder<'a, O> {
    pub fn new(oracle: &'a O, retrieval: RetrievalConfig, config: ClusterConfig) -> Self {
        Self {
            oracle,
            retriever: HybridRetriever::new(retrieval),
            config,
        }
    }

    /// Cluster one bucket, seeding in insertion order.
    pub async fn build(&self, pool: &CandidatePool, kind: ItemKind) -> BucketOutcome {
        self.build_with(pool, kind, &mut InsertionOrder).await
    }

    /// Cluster one bucket with a custom seed order.
    pub async fn build_with(
        &self,
        pool: &CandidatePool,
        kind: ItemKind,
        picker: &mut dyn SeedPicker,
    ) -> BucketOutcome {
        let (texts, vectors): (Vec<&str>, Vec<&[f32]>) = pool.iter().unzip();
        let mut remaining: BTreeSet<usize> = (0..texts.len()).collect();
        let mut outcome = BucketOutcome::default();

        while !remaining.is_empty() {
            let picked = picker.pick(&remaining, &texts);
            let seed = if remaining.contains(&picked) {
                picked
            } else {
                InsertionOrder.pick(&remaining, &texts)
            };

            let shortlist = self.shortlist(seed, &remaining, &texts, &vectors);
            if shortlist.is_empty() {
                remaining.remove(&seed);
                outcome.singletons.push(texts[seed].to_string());
                continue;
            }

            let candidates: Vec<String> = shortlist.iter().map(|&i| texts[i].to_string()).collect();
            outcome.judged += 1;
            let decision = match self.oracle.judge(texts[seed], &candidates, kind).await {
                Ok(decision) => decision,
                Err(e) => {
                    outcome.oracle_failures += 1;
                    warn!(
                        seed = texts[seed],
                        kind = %kind,
                        error = %e,
                        "Judgment failed, treating as no duplicates"
                    );
                    DedupDecision::refusal()
                }
            };

            let duplicates = accepted_duplicates(&decision, &shortlist, &texts);
            let canonical = match (&decision.canonical, duplicates.is_empty()) {
                (Some(label), false) => label,
                _ => {
                    remaining.remove(&seed);
                    outcome.singletons.push(texts[seed].to_string());
                    continue;
                }
            };

            let members: Vec<&str> = std::iter::once(texts[seed])
                .chain(duplicates.iter().map(|&i| texts[i]))
                .collect();
            let canonical = self.choose_canonical(canonical, &members);

            remaining.remove(&seed);
            for index in &duplicates {
                remaining.remove(index);
            }

            debug!(
                seed = texts[seed],
                canonical = %canonical,
                members = members.len(),
                "Cluster confirmed"
            );
            outcome.clusters.push(Cluster::new(canonical, members));
        }

        info!(
            kind = %kind,
            pool = texts.len(),
            clusters = outcome.clusters.len(),
            singletons = outcome.singletons.len(),
            oracle_failures = outcome.oracle_failures,
            "Bucket clustered"
        );
        outcome
    }

    /// Remaining-pool indices proposed for `seed`, best first.
    fn shortlist(
        &self,
        seed: usize,
        remaining: &BTreeSet<usize>,
        texts: &[&str],
        vectors: &[&[f32]],
    ) -> Vec<usize> {
        let live: Vec<usize> = remaining.iter().copied().collect();
        let live_texts: Vec<&str> = live.iter().map(|&i| texts[i]).collect();
        let live_vectors: Vec<&[f32]> = live.iter().map(|&i| vectors[i]).collect();

        self.retriever
            .rank(texts[seed], vectors[seed], &live_texts, &live_vectors)
            .into_iter()
            .map(|c| live[c.index])
            .filter(|&i| i != seed)
            .collect()
    }

    /// Pick the label a confirmed cluster is recorded under.
    fn choose_canonical(&self, label: &str, members: &[&str]) -> String {
        let label = label.trim();
        if !self.config.require_member_canonical || members.contains(&label) {
            return label.to_string();
        }

        let folded = fold(label);
        if let Some(member) = members.iter().find(|m| fold(m) == folded) {
            return member.to_string();
        }

        let seed = members[0];
        warn!(
            canonical = label,
            seed,
            "Canonical label is not a cluster member, using seed"
        );
        seed.to_string()
    }
}

fn fold(text: &str) -> String {
    normalize(text).to_lowercase()
}

/// Shortlist indices named by the decision, in decision order.
///
/// Names are matched exactly first, then ignoring case and spacing. Names
/// outside the shortlist (including the seed) are ignored.
fn accepted_duplicates(decision: &DedupDecision, shortlist: &[usize], texts: &[&str]) -> Vec<usize> {
    let exact: HashMap<&str, usize> = shortlist.iter().map(|&i| (texts[i], i)).collect();
    let mut folded: HashMap<String, usize> = HashMap::new();
    for &i in shortlist {
        folded.entry(fold(texts[i])).or_insert(i);
    }

    let mut accepted = Vec::new();
    for name in &decision.duplicates {
        let index = exact
            .get(name.as_str())
            .copied()
            .or_else(|| folded.get(&fold(name)).copied());
        match index {
            Some(i) if !accepted.contains(&i) => accepted.push(i),
            Some(_) => {}
            None => debug!(duplicate = %name, "Ignoring duplicate outside the shortlist"),
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockOracle;

    fn pool(entries: &[(&str, [f32; 2])]) -> CandidatePool {
        entries.iter().map(|(t, v)| (*t, v.to_vec())).collect()
    }

    fn country_pool() -> CandidatePool {
        pool(&[
            ("USA", [1.0, 0.0]),
            ("United States", [0.98, 0.05]),
            ("France", [0.0, 1.0]),
        ])
    }

    fn builder(oracle: &MockOracle) -> ClusterBuilder<'_, MockOracle> {
        ClusterBuilder::new(oracle, RetrievalConfig::default(), ClusterConfig::default())
    }

    #[tokio::test]
    async fn test_confirmed_merge() {
        let oracle = MockOracle::new()
            .with_decision("USA", DedupDecision::merge(["United States"], "USA"));

        let outcome = builder(&oracle).build(&country_pool(), ItemKind::Entity).await;

        assert_eq!(outcome.clusters, vec![Cluster::new("USA", ["USA", "United States"])]);
        assert_eq!(outcome.singletons, vec!["France"]);

        // France had no candidate above the gate, so only one judgment
        let calls = oracle.judge_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].candidates, vec!["United States"]);
    }

    #[tokio::test]
    async fn test_refusal_drops_only_seed() {
        let oracle = MockOracle::new();

        let outcome = builder(&oracle).build(&country_pool(), ItemKind::Entity).await;

        assert!(outcome.clusters.is_empty());
        assert_eq!(outcome.singletons, vec!["USA", "United States", "France"]);
        // Once USA is dropped nothing else has a candidate left
        assert_eq!(oracle.judge_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_oracle_failure_treated_as_refusal() {
        let oracle = MockOracle::new().failing_judge();

        let outcome = builder(&oracle).build(&country_pool(), ItemKind::Entity).await;
        assert!(outcome.clusters.is_empty());
        assert_eq!(outcome.singletons.len(), 3);
        assert_eq!(outcome.oracle_failures, 1);
    }

    #[tokio::test]
    async fn test_unknown_duplicates_ignored() {
        let oracle = MockOracle::new().with_decision(
            "USA",
            DedupDecision::merge(["Atlantis", "USA"], "USA"),
        );

        let outcome = builder(&oracle).build(&country_pool(), ItemKind::Entity).await;
        assert!(outcome.clusters.is_empty());
        assert_eq!(outcome.singletons.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_names_matched_loosely() {
        let oracle = MockOracle::new().with_decision(
            "USA",
            DedupDecision::merge(["united  states"], "usa"),
        );

        let outcome = builder(&oracle).build(&country_pool(), ItemKind::Entity).await;
        assert_eq!(outcome.clusters, vec![Cluster::new("USA", ["USA", "United States"])]);
    }

    #[tokio::test]
    async fn test_foreign_canonical_falls_back_to_seed() {
        let oracle = MockOracle::new().with_decision(
            "USA",
            DedupDecision::merge(["United States"], "United States of America"),
        );

        let outcome = builder(&oracle).build(&country_pool(), ItemKind::Entity).await;
        assert_eq!(outcome.clusters[0].canonical, "USA");
    }

    #[tokio::test]
    async fn test_trusted_canonical_used_verbatim() {
        let oracle = MockOracle::new().with_decision(
            "USA",
            DedupDecision::merge(["United States"], "United States of America"),
        );
        let builder = ClusterBuilder::new(
            &oracle,
            RetrievalConfig::default(),
            ClusterConfig::new().trust_oracle_canonical(),
        );

        let outcome = builder.build(&country_pool(), ItemKind::Entity).await;
        assert_eq!(outcome.clusters[0].canonical, "United States of America");
        assert!(!outcome.clusters[0].contains("United States of America"));
    }

    #[tokio::test]
    async fn test_scripted_seed_order() {
        let oracle = MockOracle::new()
            .with_decision("United States", DedupDecision::merge(["USA"], "United States"));

        let mut order = ScriptedOrder::new(["France", "United States"]);
        let outcome = builder(&oracle)
            .build_with(&country_pool(), ItemKind::Entity, &mut order)
            .await;

        assert_eq!(outcome.singletons, vec!["France"]);
        assert_eq!(
            outcome.clusters,
            vec![Cluster::new("United States", ["USA", "United States"])]
        );
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let oracle = MockOracle::new();
        let outcome = builder(&oracle).build(&CandidatePool::new(), ItemKind::Relation).await;
        assert_eq!(outcome, BucketOutcome::default());
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partition_with_greedy_oracle() {
        // Everything is similar; the oracle merges every candidate it sees
        let entries: Vec<(String, Vec<f32>)> = (0..7)
            .map(|i| (format!("item {}", i), vec![1.0, i as f32 * 0.01]))
            .collect();
        let pool: CandidatePool = entries.into_iter().collect();
        let oracle = MockOracle::new()
            .with_judge_fn(|seed, candidates, _| DedupDecision::merge(candidates[..1].to_vec(), seed));
        let builder = ClusterBuilder::new(
            &oracle,
            RetrievalConfig::default().with_top_k(3),
            ClusterConfig::default(),
        );

        let outcome = builder.build(&pool, ItemKind::Entity).await;

        let mut seen: Vec<String> = outcome
            .clusters
            .iter()
            .flat_map(|c| c.members.iter().cloned())
            .chain(outcome.singletons.iter().cloned())
            .collect();
        seen.sort();
        let mut expected: Vec<String> = pool.texts().map(str::to_string).collect();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(outcome.clusters.len(), 3);
        assert_eq!(outcome.singletons.len(), 1);
    }
}
