use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use super::{flag, write_classified};
use crate::dataset::{TEXT_COLUMN, Table};
use crate::models::{KeywordSet, RuleFile, split_context};
use crate::ollama::{Embedder, OllamaError};

/// Errors raised by embedding-similarity tagging.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend failed")]
    Backend(#[from] OllamaError),

    /// No rule asserts the tag, so it has no class vector.
    #[error("no rule asserts tag '{0}'")]
    NoExamples(String),

    #[error("embedding has {found} dimensions, expected {expected}")]
    Dimension { expected: usize, found: usize },
}

/// Name of the column holding the chunks that made a tag positive.
pub fn evidence_column(tag: &str) -> String {
    format!("{tag}_evidence")
}

/// Cosine similarity of two vectors; 0 when either has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

struct ClassVector {
    tag: String,
    keywords: Vec<String>,
    vector: Vec<f32>,
}

/// Tags rows by comparing keyword chunks to a mean embedding of each tag's rules.
///
/// A chunk is a candidate for a tag only if it contains one of the tag's keywords. The
/// tag is positive when any candidate scores strictly above the threshold.
pub struct SimilarityTagger {
    embedder: Arc<dyn Embedder>,
    classes: Vec<ClassVector>,
    threshold: f64,
}

impl SimilarityTagger {
    /// Embeds every rule once and averages them into one class vector per tag.
    ///
    /// A rule contributes to a tag when its encoding asserts that tag.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        rule_files: &[RuleFile],
        keywords: &KeywordSet,
        threshold: f64,
    ) -> Result<Self, EmbedError> {
        let mut examples: Vec<(String, Vec<String>)> = Vec::new();
        for file in rule_files {
            for (offset, tag) in file.tags.iter().enumerate() {
                let texts: Vec<String> = file
                    .rules
                    .iter()
                    .filter(|rule| rule.encoding.get(offset))
                    .map(|rule| rule.pattern.as_str().to_string())
                    .collect();
                match examples.iter_mut().find(|(t, _)| t == tag) {
                    Some((_, existing)) => existing.extend(texts),
                    None => examples.push((tag.clone(), texts)),
                }
            }
        }

        let mut classes = Vec::with_capacity(examples.len());
        for (tag, texts) in examples {
            if texts.is_empty() {
                return Err(EmbedError::NoExamples(tag));
            }
            let vectors = embedder.embed(&texts)?;
            let vector = mean_vector(&vectors)?;
            debug!(tag = %tag, rules = texts.len(), dims = vector.len(), "class vector ready");
            classes.push(ClassVector {
                keywords: keywords.keywords_for(&tag).to_vec(),
                tag,
                vector,
            });
        }

        Ok(Self {
            embedder,
            classes,
            threshold,
        })
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|c| c.tag.as_str())
    }

    /// Per tag: whether it is positive and the chunks that scored above the threshold.
    pub fn tag_context(&self, context: &str) -> Result<Vec<(bool, Vec<String>)>, EmbedError> {
        let chunks: Vec<&str> = split_context(context).collect();

        // Each distinct candidate chunk is embedded once per row.
        let mut wanted: Vec<String> = Vec::new();
        for class in &self.classes {
            for chunk in &chunks {
                if class.keywords.iter().any(|k| chunk.contains(k.as_str()))
                    && !wanted.iter().any(|w| w == chunk)
                {
                    wanted.push(chunk.to_string());
                }
            }
        }
        if wanted.is_empty() {
            return Ok(vec![(false, Vec::new()); self.classes.len()]);
        }

        let vectors = self.embedder.embed(&wanted)?;
        let by_chunk: HashMap<&str, &Vec<f32>> =
            wanted.iter().map(String::as_str).zip(vectors.iter()).collect();

        let mut results = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            let mut evidence = Vec::new();
            for chunk in &chunks {
                if !class.keywords.iter().any(|k| chunk.contains(k.as_str())) {
                    continue;
                }
                let Some(vector) = by_chunk.get(chunk) else {
                    continue;
                };
                if vector.len() != class.vector.len() {
                    return Err(EmbedError::Dimension {
                        expected: class.vector.len(),
                        found: vector.len(),
                    });
                }
                if cosine_similarity(vector, &class.vector) > self.threshold {
                    evidence.push(chunk.to_string());
                }
            }
            results.push((!evidence.is_empty(), evidence));
        }
        Ok(results)
    }

    /// Adds a 0/1 column and an evidence column per tag. Returns the number of tagged rows.
    pub fn apply(&self, table: &mut Table) -> Result<usize> {
        let text = table.require_column(TEXT_COLUMN)?;
        let mut labels = Vec::with_capacity(table.len());
        for row in table.rows() {
            labels.push(self.tag_context(&row[text])?);
        }

        for (offset, class) in self.classes.iter().enumerate() {
            let flags = labels.iter().map(|l| flag(l[offset].0)).collect();
            let evidence = labels.iter().map(|l| l[offset].1.join("|")).collect();
            table.set_column(&class.tag, flags)?;
            table.set_column(&evidence_column(&class.tag), evidence)?;
        }
        Ok(labels
            .iter()
            .filter(|l| l.iter().any(|(positive, _)| *positive))
            .count())
    }

    /// Classifies every extracted file into `out_dir/<stem>.csv`.
    pub fn run(&self, files: &[PathBuf], out_dir: &Path) -> Result<Vec<PathBuf>> {
        info!(threshold = self.threshold, tags = self.classes.len(), "similarity tagging");
        write_classified(files, out_dir, |table| self.apply(table))
    }
}

fn mean_vector(vectors: &[Vec<f32>]) -> Result<Vec<f32>, EmbedError> {
    let width = vectors.first().map_or(0, Vec::len);
    let mut sum = vec![0.0f64; width];
    for vector in vectors {
        if vector.len() != width {
            return Err(EmbedError::Dimension {
                expected: width,
                found: vector.len(),
            });
        }
        for (total, &value) in sum.iter_mut().zip(vector) {
            *total += f64::from(value);
        }
    }
    let n = vectors.len().max(1) as f64;
    Ok(sum.into_iter().map(|total| (total / n) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Maps known texts to fixed vectors and records every request.
    struct TableEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl TableEmbedder {
        fn new(pairs: &[(&str, [f32; 2])]) -> Arc<Self> {
            Arc::new(Self {
                vectors: pairs
                    .iter()
                    .map(|(text, v)| (text.to_string(), v.to_vec()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl Embedder for TableEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OllamaError> {
            self.calls.lock().unwrap().push(texts.to_vec());
            Ok(texts
                .iter()
                .map(|t| self.vectors.get(t).cloned().unwrap_or(vec![0.0, 0.0]))
                .collect())
        }
    }

    fn keywords() -> KeywordSet {
        let mut set = KeywordSet::new();
        set.insert("fraud", ["fraud"]);
        set
    }

    fn rule_file() -> RuleFile {
        RuleFile::from_reader("r", "rule,prio,fraud\nembezzlement,1,1\nweather,1,0\n".as_bytes())
            .unwrap()
    }

    #[test]
    fn cosine_of_orthogonal_and_zero_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn class_vector_uses_only_asserting_rules() {
        let embedder = TableEmbedder::new(&[("embezzlement", [1.0, 0.0]), ("weather", [0.0, 1.0])]);
        SimilarityTagger::new(embedder.clone(), &[rule_file()], &keywords(), 0.5).unwrap();

        let calls = embedder.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["embezzlement".to_string()]);
    }

    #[test]
    fn similarity_equal_to_threshold_is_not_positive() {
        let embedder = TableEmbedder::new(&[
            ("embezzlement", [1.0, 0.0]),
            ("fraud exactly", [3.0, 4.0]),
            ("fraud above", [4.0, 3.0]),
        ]);
        let tagger = SimilarityTagger::new(embedder, &[rule_file()], &keywords(), 0.6).unwrap();

        assert_eq!(tagger.tag_context("fraud exactly").unwrap(), vec![(false, Vec::<String>::new())]);
        assert_eq!(
            tagger.tag_context("fraud exactly|fraud above").unwrap(),
            vec![(true, vec!["fraud above".to_string()])]
        );
    }

    #[test]
    fn chunks_without_tag_keywords_are_not_embedded() {
        let embedder = TableEmbedder::new(&[("embezzlement", [1.0, 0.0]), ("quiet day", [1.0, 0.0])]);
        let tagger =
            SimilarityTagger::new(embedder.clone(), &[rule_file()], &keywords(), 0.1).unwrap();

        assert_eq!(tagger.tag_context("quiet day").unwrap(), vec![(false, Vec::<String>::new())]);
        assert_eq!(embedder.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn apply_writes_flag_and_evidence_columns() {
        let embedder = TableEmbedder::new(&[("embezzlement", [1.0, 0.0]), ("fraud case", [1.0, 0.1])]);
        let tagger = SimilarityTagger::new(embedder, &[rule_file()], &keywords(), 0.6).unwrap();

        let mut table = Table::new(vec!["id".into(), TEXT_COLUMN.into()]);
        table.push_row(vec!["1".into(), "fraud case|other".into()]);
        table.push_row(vec!["2".into(), "nothing".into()]);

        assert_eq!(tagger.apply(&mut table).unwrap(), 1);
        assert_eq!(table.headers(), &["id", "text", "fraud", "fraud_evidence"]);
        assert_eq!(table.rows()[0][2..], ["1", "fraud case"]);
        assert_eq!(table.rows()[1][2..], ["0", ""]);
    }

    #[test]
    fn tag_without_asserting_rule_is_rejected() {
        let file = RuleFile::from_reader("r", "rule,prio,fraud\nweather,1,0\n".as_bytes()).unwrap();
        let embedder = TableEmbedder::new(&[]);
        let err = SimilarityTagger::new(embedder, &[file], &keywords(), 0.5)
            .err()
            .unwrap();
        assert!(matches!(err, EmbedError::NoExamples(tag) if tag == "fraud"));
    }
}
