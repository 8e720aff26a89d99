//! Okapi BM25 over a small in-memory corpus.
//!
//! The corpus is the candidate pool itself, rebuilt for every query, so no
//! index is persisted.

use std::collections::HashMap;

/// BM25 parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    /// Negative IDFs are replaced by `epsilon * mean_idf`.
    pub epsilon: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// A BM25 scorer built over pre-tokenized documents.
#[derive(Debug, Clone)]
pub struct Bm25 {
    params: Bm25Params,
    doc_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avgdl: f32,
    idf: HashMap<String, f32>,
}

impl Bm25 {
    pub fn new(corpus: &[Vec<String>], params: Bm25Params) -> Self {
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut containing: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for term in doc {
                *freqs.entry(term.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(doc.len());
            doc_freqs.push(freqs);
        }

        let total: usize = doc_lens.iter().sum();
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total as f32 / corpus.len() as f32
        };

        let idf = Self::compute_idf(corpus.len(), &containing, params.epsilon);

        Self {
            params,
            doc_freqs,
            doc_lens,
            avgdl,
            idf,
        }
    }

    fn compute_idf(
        n_docs: usize,
        containing: &HashMap<String, usize>,
        epsilon: f32,
    ) -> HashMap<String, f32> {
        let n = n_docs as f32;
        let mut idf = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0f32;
        let mut negative = Vec::new();

        for (term, &freq) in containing {
            let freq = freq as f32;
            let value = (n - freq + 0.5).ln() - (freq + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }

        if !idf.is_empty() {
            let floor = epsilon * idf_sum / idf.len() as f32;
            for term in negative {
                idf.insert(term, floor);
            }
        }
        idf
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Score every document against the query, in corpus order.
    pub fn scores(&self, query: &[String]) -> Vec<f32> {
        let Bm25Params { k1, b, .. } = self.params;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };

        self.doc_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(freqs, &len)| {
                query
                    .iter()
                    .map(|term| {
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        let tf = freqs.get(term).copied().unwrap_or(0) as f32;
                        let norm = k1 * (1.0 - b + b * len as f32 / avgdl);
                        idf * (tf * (k1 + 1.0)) / (tf + norm)
                    })
                    .sum()
            })
            .collect()
    }
}
