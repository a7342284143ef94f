//! TF-IDF vectorizer over word n-grams.
//!
//! Tokens are whitespace-separated words of at least two characters (the
//! input is already normalized). Features are the `max_features` most
//! frequent n-grams of the training corpus, indexed alphabetically.
//! Weights use sublinear term frequency, smoothed IDF and L2 normalization.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Sparse feature vector: `(feature index, weight)` sorted by index
pub type SparseVector = Vec<(usize, f64)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    max_features: usize,
    ngram_range: (usize, usize),
    sublinear_tf: bool,
}

impl TfidfVectorizer {
    pub fn new(max_features: usize, ngram_range: (usize, usize), sublinear_tf: bool) -> Self {
        let min_n = ngram_range.0.max(1);
        TfidfVectorizer {
            vocabulary: HashMap::new(),
            idf: Vec::new(),
            max_features,
            ngram_range: (min_n, ngram_range.1.max(min_n)),
            sublinear_tf,
        }
    }

    pub fn n_features(&self) -> usize {
        self.idf.len()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.vocabulary.contains_key(term)
    }

    /// Vocabulary indices must be exactly `0..n_features()`
    pub fn validate(&self) -> Result<(), String> {
        if self.vocabulary.len() != self.idf.len() {
            return Err(format!(
                "{} terms for {} idf weights",
                self.vocabulary.len(),
                self.idf.len()
            ));
        }
        let mut seen = vec![false; self.idf.len()];
        for (term, &idx) in &self.vocabulary {
            match seen.get_mut(idx) {
                Some(slot) if *slot => {
                    return Err(format!("index {} used twice (at {:?})", idx, term))
                }
                Some(slot) => *slot = true,
                None => return Err(format!("term {:?} has out-of-range index {}", term, idx)),
            }
        }
        if self.idf.iter().any(|w| !w.is_finite()) {
            return Err("non-finite idf weight".to_string());
        }
        Ok(())
    }

    fn ngrams(&self, document: &str) -> Vec<String> {
        let tokens: Vec<&str> = document
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2)
            .collect();

        let (min_n, max_n) = self.ngram_range;
        let mut grams = Vec::new();
        for n in min_n..=max_n {
            if n > tokens.len() {
                break;
            }
            grams.extend(tokens.windows(n).map(|w| w.join(" ")));
        }
        grams
    }

    /// Build the vocabulary and IDF table from training documents
    pub fn fit(&mut self, documents: &[String]) {
        let mut term_count: BTreeMap<String, usize> = BTreeMap::new();
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();

        for doc in documents {
            let grams = self.ngrams(doc);
            let mut seen: Vec<&String> = Vec::with_capacity(grams.len());
            for gram in &grams {
                *term_count.entry(gram.clone()).or_insert(0) += 1;
                if !seen.contains(&gram) {
                    seen.push(gram);
                    *doc_freq.entry(gram.clone()).or_insert(0) += 1;
                }
            }
        }

        // Most frequent first, alphabetical among equals
        let mut ranked: Vec<(&String, &usize)> = term_count.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut selected: Vec<&String> = ranked
            .into_iter()
            .take(self.max_features)
            .map(|(term, _)| term)
            .collect();
        selected.sort();

        let n_docs = documents.len() as f64;
        self.vocabulary = HashMap::with_capacity(selected.len());
        self.idf = Vec::with_capacity(selected.len());
        for (idx, term) in selected.into_iter().enumerate() {
            let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
            self.idf.push(((1.0 + n_docs) / (1.0 + df)).ln() + 1.0);
            self.vocabulary.insert(term.clone(), idx);
        }
    }

    /// Vectorize one document; unknown n-grams are ignored
    pub fn transform(&self, document: &str) -> SparseVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for gram in self.ngrams(document) {
            if let Some(&idx) = self.vocabulary.get(&gram) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(idx, count)| {
                let tf = if self.sublinear_tf { 1.0 + count.ln() } else { count };
                (idx, tf * self.idf[idx])
            })
            .collect();

        let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut vector {
                *w /= norm;
            }
        }
        vector
    }

    pub fn transform_all(&self, documents: &[String]) -> Vec<SparseVector> {
        documents.iter().map(|d| self.transform(d)).collect()
    }

    pub fn fit_transform(&mut self, documents: &[String]) -> Vec<SparseVector> {
        self.fit(documents);
        self.transform_all(documents)
    }
}
