//! Sparse keyword search with BM25 weighting.
//!
//! Okapi BM25 over tokenized chunk text: `k1 = 1.2`, `b = 0.75`.
//! Built fresh per call from the chunk list the engine hands it; the
//! corpus lives in the chunk store, not here.

use hearthmind_core::chunk::Chunk;
use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// A one-shot BM25 scorer over a chunk set.
pub struct Bm25 {
    doc_tokens: Vec<(usize, Vec<String>)>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
    total_docs: usize,
}

impl Bm25 {
    /// Index the given chunks (by position in the slice).
    pub fn new(chunks: &[Chunk]) -> Self {
        let doc_tokens: Vec<(usize, Vec<String>)> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, tokenize(&c.text)))
            .collect();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for (_, tokens) in &doc_tokens {
            let mut seen: Vec<&String> = Vec::new();
            for token in tokens {
                if !seen.contains(&token) {
                    seen.push(token);
                    *doc_freq.entry(token.clone()).or_default() += 1;
                }
            }
        }

        let total_docs = doc_tokens.len();
        let avg_len = if total_docs == 0 {
            0.0
        } else {
            doc_tokens.iter().map(|(_, t)| t.len()).sum::<usize>() as f64 / total_docs as f64
        };

        Self {
            doc_tokens,
            doc_freq,
            avg_len,
            total_docs,
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        let n = self.total_docs as f64;
        (((n - df + 0.5) / (df + 0.5)) + 1.0).ln()
    }

    /// Top-k chunk positions with positive BM25 scores, descending.
    pub fn search(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        if k == 0 || self.total_docs == 0 {
            return Vec::new();
        }
        let query_terms = tokenize(query);

        let mut scored: Vec<(usize, f64)> = self
            .doc_tokens
            .iter()
            .filter_map(|(idx, tokens)| {
                let len = tokens.len() as f64;
                let mut score = 0.0;
                for term in &query_terms {
                    let tf = tokens.iter().filter(|t| *t == term).count() as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let norm = tf * (K1 + 1.0)
                        / (tf + K1 * (1.0 - B + B * len / self.avg_len.max(1.0)));
                    score += self.idf(term) * norm;
                }
                (score > 0.0).then_some((*idx, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> Chunk {
        Chunk::new("src", 0, text)
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(
            tokenize("Annual leave: 20 working-days!"),
            vec!["annual", "leave", "20", "working", "days"]
        );
    }

    #[test]
    fn matching_terms_rank_higher() {
        let chunks = vec![
            chunk("annual leave is twenty working days"),
            chunk("the database needs vacuuming weekly"),
            chunk("leave requests go through the portal"),
        ];
        let bm25 = Bm25::new(&chunks);
        let hits = bm25.search("annual leave days", 3);

        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, 0);
        assert!(hits.iter().all(|(idx, _)| *idx != 1));
    }

    #[test]
    fn rare_terms_outweigh_common_ones() {
        let chunks = vec![
            chunk("policy policy policy common words"),
            chunk("the zygote term is rare"),
            chunk("policy appears here too"),
        ];
        let bm25 = Bm25::new(&chunks);
        let hits = bm25.search("zygote", 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn empty_corpus_and_zero_k() {
        let bm25 = Bm25::new(&[]);
        assert!(bm25.search("anything", 5).is_empty());

        let bm25 = Bm25::new(&[chunk("some text")]);
        assert!(bm25.search("text", 0).is_empty());
    }
}
