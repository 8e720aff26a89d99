//! Token-budgeted batching of classification requests.
//!
//! The scheduler turns a stream of independent "label this text" requests
//! into few oracle calls:
//!
//! - a cached text is answered immediately and never joins a batch
//! - a text already waiting in the current batch is attached to that entry
//! - otherwise the text is appended, flushing first when it would push the
//!   batch past the token budget or the item ceiling
//!
//! Every item of a flushed batch gets a label: the oracle's, or the fallback
//! label when the oracle failed or skipped the item. Labels are written to
//! the cache before they are handed back.

use std::collections::HashMap;
use std::mem;

use tracing::{debug, warn};

use crate::text::{estimate_tokens, normalize};
use crate::traits::oracle::{ClassifyItem, Oracle};
use crate::types::config::BatchConfig;

/// A label delivered for one submitted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labeled {
    /// Submission order within this scheduler (0-based)
    pub seq: usize,
    pub text: String,
    pub label: String,
}

/// Normalized text → label, written once per key.
#[derive(Debug, Clone, Default)]
pub struct LabelCache {
    entries: HashMap<String, String>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str) -> Option<&str> {
        self.entries.get(&normalize(text)).map(String::as_str)
    }

    /// Store a label unless one is already cached. Returns true if stored.
    pub fn insert(&mut self, text: &str, label: impl Into<String>) -> bool {
        let key = normalize(text);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, label.into());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counters for one scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Texts pushed
    pub submitted: usize,
    /// Answered from the cache without joining a batch
    pub cache_hits: usize,
    /// Attached to an identical text already waiting in the batch
    pub coalesced: usize,
    /// Oracle calls made
    pub batches: usize,
    /// Oracle calls that failed outright
    pub oracle_failures: usize,
    /// Items that received the fallback label
    pub fallbacks: usize,
}

#[derive(Debug)]
struct PendingItem {
    text: String,
    /// Every submission waiting on this text: (seq, submitted text)
    waiters: Vec<(usize, String)>,
}

/// Batches classification requests against an [`Oracle`].
pub struct BatchScheduler<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    config: BatchConfig,
    cache: LabelCache,
    pending: Vec<PendingItem>,
    /// Normalized text → position in `pending`
    pending_keys: HashMap<String, usize>,
    /// Base prompt estimate plus every pending item
    pending_tokens: usize,
    next_seq: usize,
    stats: BatchStats,
}

impl<'a, O: Oracle + ?Sized> BatchScheduler<'a, O> {
    pub fn new(oracle: &'a O, config: BatchConfig) -> Self {
        let pending_tokens = config.base_prompt_tokens;
        Self {
            oracle,
            config,
            cache: LabelCache::new(),
            pending: Vec::new(),
            pending_keys: HashMap::new(),
            pending_tokens,
            next_seq: 0,
            stats: BatchStats::default(),
        }
    }

    /// Start from a pre-filled cache.
    pub fn with_cache(mut self, cache: LabelCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &LabelCache {
        &self.cache
    }

    pub fn into_cache(self) -> LabelCache {
        self.cache
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Items waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Submit one text.
    ///
    /// Returns every label that became available: the text's own label on a
    /// cache hit, or a whole flushed batch when this text forced a flush.
    /// Results are tagged with their submission `seq`.
    pub async fn push(&mut self, text: impl Into<String>) -> Vec<Labeled> {
        let text = text.into();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.submitted += 1;

        if let Some(label) = self.cache.get(&text) {
            self.stats.cache_hits += 1;
            let label = label.to_string();
            return vec![Labeled { seq, text, label }];
        }

        let key = normalize(&text);
        if let Some(&position) = self.pending_keys.get(&key) {
            self.stats.coalesced += 1;
            self.pending[position].waiters.push((seq, text));
            return Vec::new();
        }

        let tokens = estimate_tokens(&text);
        let mut ready = Vec::new();
        if !self.pending.is_empty()
            && (self.pending_tokens + tokens > self.config.max_input_tokens
                || self.pending.len() >= self.config.max_batch_size)
        {
            ready = self.flush().await;
        }

        self.pending_keys.insert(key, self.pending.len());
        self.pending.push(PendingItem {
            text: text.clone(),
            waiters: vec![(seq, text)],
        });
        self.pending_tokens += tokens;

        ready
    }

    /// Flush whatever is still pending.
    pub async fn finish(&mut self) -> Vec<Labeled> {
        self.flush().await
    }

    /// Label every text, in input order.
    pub async fn classify_all<I, S>(&mut self, texts: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let first_seq = self.next_seq;
        let mut results = Vec::new();
        for text in texts {
            results.extend(self.push(text).await);
        }
        results.extend(self.finish().await);

        results.sort_by_key(|r| r.seq);
        results
            .into_iter()
            .map(|r| {
                debug_assert!(r.seq >= first_seq);
                r.label
            })
            .collect()
    }

    async fn flush(&mut self) -> Vec<Labeled> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let items = mem::take(&mut self.pending);
        self.pending_keys.clear();
        let estimated_tokens = mem::replace(&mut self.pending_tokens, self.config.base_prompt_tokens);

        // Local ids are 1-based positions within this batch
        let batch: Vec<ClassifyItem> = items
            .iter()
            .enumerate()
            .map(|(i, item)| ClassifyItem::new(i + 1, item.text.clone()))
            .collect();

        self.stats.batches += 1;
        debug!(
            items = batch.len(),
            estimated_tokens,
            "Flushing classification batch"
        );

        let mut labels: HashMap<usize, String> = HashMap::new();
        match self.oracle.classify(&batch).await {
            Ok(returned) => {
                for entry in returned {
                    let label = entry.label.trim();
                    if entry.id == 0 || entry.id > batch.len() || label.is_empty() {
                        continue;
                    }
                    labels.entry(entry.id).or_insert_with(|| label.to_string());
                }
            }
            Err(e) => {
                self.stats.oracle_failures += 1;
                warn!(
                    error = %e,
                    items = batch.len(),
                    fallback = %self.config.fallback_label,
                    "Classification failed, using fallback label for batch"
                );
            }
        }

        let mut ready = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let label = match labels.remove(&(i + 1)) {
                Some(label) => label,
                None => {
                    self.stats.fallbacks += 1;
                    self.config.fallback_label.clone()
                }
            };
            self.cache.insert(&item.text, label.clone());
            for (seq, text) in item.waiters {
                ready.push(Labeled {
                    seq,
                    text,
                    label: label.clone(),
                });
            }
        }
        ready
    }
}
