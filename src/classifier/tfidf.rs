use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").expect("valid regex"));

/// English stopwords removed before counting.
pub const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "ain", "all", "am", "an", "and", "any",
    "are", "aren", "as", "at", "be", "because", "been", "before", "being", "below", "between",
    "both", "but", "by", "can", "couldn", "did", "didn", "do", "does", "doesn", "doing", "don",
    "down", "during", "each", "few", "for", "from", "further", "had", "hadn", "has", "hasn",
    "have", "haven", "having", "he", "her", "here", "hers", "herself", "him", "himself", "his",
    "how", "if", "in", "into", "is", "isn", "it", "its", "itself", "just", "ll", "ma", "me",
    "mightn", "more", "most", "mustn", "my", "myself", "needn", "no", "nor", "not", "now", "of",
    "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own",
    "re", "same", "shan", "she", "should", "shouldn", "so", "some", "such", "than", "that",
    "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "ve", "very", "was", "wasn", "we",
    "were", "weren", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "won", "wouldn", "you", "your", "yours", "yourself", "yourselves",
];

/// Sparse row: `(feature, value)` pairs sorted by feature.
pub type SparseVector = Vec<(usize, f64)>;

/// Value of `feature` in a sparse row, 0 when absent.
pub fn sparse_get(row: &[(usize, f64)], feature: usize) -> f64 {
    row.binary_search_by_key(&feature, |&(f, _)| f)
        .map(|i| row[i].1)
        .unwrap_or(0.0)
}

/// Lower-cased tokens of two or more word characters, stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    RE_TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Term frequency times smoothed inverse document frequency, L2-normalised per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Learns the vocabulary and `idf = ln((1 + n) / (1 + df)) + 1`.
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let mut df: BTreeMap<String, usize> = BTreeMap::new();
        for doc in documents {
            let mut tokens = tokenize(doc.as_ref());
            tokens.sort();
            tokens.dedup();
            for token in tokens {
                *df.entry(token).or_insert(0) += 1;
            }
        }

        let n = documents.len() as f64;
        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(df.len());
        for (index, (token, count)) in df.into_iter().enumerate() {
            idf.push(((1.0 + n) / (1.0 + count as f64)).ln() + 1.0);
            vocabulary.insert(token, index);
        }
        Self { vocabulary, idf }
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.idf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idf.is_empty()
    }

    /// Vectorizes one document. Unknown tokens are ignored.
    pub fn transform(&self, document: &str) -> SparseVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for token in tokenize(document) {
            if let Some(&feature) = self.vocabulary.get(&token) {
                *counts.entry(feature).or_insert(0.0) += 1.0;
            }
        }

        let mut row: SparseVector = counts
            .into_iter()
            .map(|(feature, tf)| (feature, tf * self.idf[feature]))
            .collect();
        let norm = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, value) in &mut row {
                *value /= norm;
            }
        }
        row
    }

    pub fn transform_all<S: AsRef<str>>(&self, documents: &[S]) -> Vec<SparseVector> {
        documents.iter().map(|d| self.transform(d.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_stopwords_and_short_tokens() {
        assert_eq!(tokenize("The fraud IS a big x problem"), vec!["fraud", "big", "problem"]);
    }

    #[test]
    fn rare_terms_weigh_more() {
        let docs = ["fraud report", "fraud audit", "fraud memo"];
        let vectorizer = TfidfVectorizer::fit(&docs);
        assert_eq!(vectorizer.len(), 4);

        let row = vectorizer.transform("fraud audit");
        let norm: f64 = row.iter().map(|(_, v)| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-9);
        // Features are numbered alphabetically: audit = 0, fraud = 1.
        assert!(row[0].1 > row[1].1, "audit is rarer than fraud: {row:?}");
    }

    #[test]
    fn unknown_document_is_empty_row() {
        let vectorizer = TfidfVectorizer::fit(&["fraud report"]);
        assert!(vectorizer.transform("nothing known").is_empty());
    }

    #[test]
    fn sparse_lookup() {
        let row = vec![(1, 0.5), (4, 0.25)];
        assert_eq!(sparse_get(&row, 4), 0.25);
        assert_eq!(sparse_get(&row, 2), 0.0);
    }
}
