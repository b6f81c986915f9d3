//! Per-tag binary text classifiers trained on a rule-derived corpus.
//!
//! Each tag gets its own TF-IDF vocabulary and either a multinomial naive Bayes model or a
//! random forest. Forests are compiled into [`CompiledForest`] before saving. Models are
//! stored as JSON files named `<NB|RF>_<sample rate>-<tag>.json`.

mod bayes;
mod forest;
mod metrics;
mod tfidf;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{CHUNK_COLUMN, Table};
use crate::extrapolate::is_flag_set;
use crate::models::split_context;
use crate::utils::ensure_parent_directory;

pub use bayes::NaiveBayes;
pub use forest::{CompiledForest, ForestParams, RandomForest};
pub use metrics::{Metrics, score};
pub use tfidf::{STOPWORDS, SparseVector, TfidfVectorizer, tokenize};

/// Share of the corpus held out for scoring.
pub const TEST_FRACTION: f64 = 0.2;

/// Additive smoothing of the naive Bayes model.
pub const NB_ALPHA: f64 = 1.0;

/// Model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "NB")]
    NaiveBayes,
    #[serde(rename = "RF")]
    RandomForest,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NaiveBayes => write!(f, "NB"),
            Self::RandomForest => write!(f, "RF"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NB" | "NAIVEBAYES" | "NAIVE-BAYES" => Ok(Self::NaiveBayes),
            "RF" | "RANDOMFOREST" | "RANDOM-FOREST" => Ok(Self::RandomForest),
            other => Err(format!("unknown model kind '{other}' (expected NB or RF)")),
        }
    }
}

/// Where a model came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub kind: ModelKind,
    pub sample_rate: f64,
    /// Name of the rule file the corpus was built from.
    pub rules: String,
    pub tag: String,
}

impl ModelIdentity {
    /// File name the model is saved under, e.g. `RF_0.5-fraud.json`.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::classifier::{ModelIdentity, ModelKind};
    ///
    /// let identity = ModelIdentity {
    ///     kind: ModelKind::NaiveBayes,
    ///     sample_rate: 1.0,
    ///     rules: "audit".into(),
    ///     tag: "fraud".into(),
    /// };
    /// assert_eq!(identity.file_name(), "NB_1.0-fraud.json");
    /// ```
    pub fn file_name(&self) -> String {
        format!("{}_{:?}-{}.json", self.kind, self.sample_rate, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model")]
pub enum Classifier {
    NaiveBayes(NaiveBayes),
    RandomForest(CompiledForest),
}

/// A persisted per-tag model: vocabulary plus classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagModel {
    pub identity: ModelIdentity,
    pub vectorizer: TfidfVectorizer,
    pub classifier: Classifier,
}

impl TagModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid model file {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_directory(path)?;
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write model {}", path.display()))
    }

    pub fn tag(&self) -> &str {
        &self.identity.tag
    }

    /// Predicts one chunk.
    pub fn predict(&self, chunk: &str) -> bool {
        let row = self.vectorizer.transform(chunk);
        match &self.classifier {
            Classifier::NaiveBayes(model) => model.predict(&row),
            Classifier::RandomForest(model) => model.predict(&row),
        }
    }

    /// Row-level label: positive if any chunk of the context string is.
    pub fn predict_context(&self, context: &str) -> bool {
        split_context(context).any(|chunk| self.predict(chunk))
    }
}

/// Outcome of training one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagReport {
    pub tag: String,
    pub metrics: Metrics,
    pub model_path: PathBuf,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Shuffles `0..n` with `seed` and holds out the first `ceil(n * TEST_FRACTION)` indices.
///
/// Returns `(train, test)`.
pub fn train_test_split(n: usize, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let test_len = ((n as f64) * TEST_FRACTION).ceil() as usize;
    let train = indices.split_off(test_len.min(n));
    (train, indices)
}

/// Trains one classifier per tag column of a training corpus.
pub struct Trainer {
    chunks: Vec<String>,
    /// Tag name and its 0/1 column.
    labels: Vec<(String, Vec<bool>)>,
    kind: ModelKind,
    sample_rate: f64,
    rules: String,
    params: ForestParams,
    out_dir: PathBuf,
}

impl Trainer {
    /// Reads a corpus with a `chunk` column followed by tag columns.
    pub fn from_corpus(
        corpus: &Path,
        kind: ModelKind,
        sample_rate: f64,
        out_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let table = Table::read(corpus)?;
        let chunk = table
            .require_column(CHUNK_COLUMN)
            .with_context(|| format!("Not a training corpus: {}", corpus.display()))?;

        let labels: Vec<(String, Vec<bool>)> = table
            .headers()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != chunk)
            .map(|(i, tag)| {
                let column: Vec<bool> = table.rows().iter().map(|row| is_flag_set(&row[i])).collect();
                (tag.clone(), column)
            })
            .collect();
        let chunks: Vec<String> = table.rows().iter().map(|row| row[chunk].clone()).collect();
        let rules = corpus
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            chunks,
            labels,
            kind,
            sample_rate,
            rules,
            params: ForestParams::default(),
            out_dir: out_dir.into(),
        })
    }

    pub fn with_params(mut self, params: ForestParams) -> Self {
        self.params = params;
        self
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|(tag, _)| tag.as_str())
    }

    /// Trains every tag lazily, one report per step, so callers can stream progress.
    pub fn reports(&self) -> impl Iterator<Item = Result<TagReport>> + '_ {
        self.labels
            .iter()
            .map(|(tag, labels)| self.train_tag(tag, labels))
    }

    fn train_tag(&self, tag: &str, labels: &[bool]) -> Result<TagReport> {
        if self.chunks.is_empty() {
            anyhow::bail!("Training corpus for '{}' is empty", self.rules);
        }
        let (train, test) = train_test_split(self.chunks.len(), self.params.seed);

        let train_docs: Vec<&str> = train.iter().map(|&i| self.chunks[i].as_str()).collect();
        let train_labels: Vec<bool> = train.iter().map(|&i| labels[i]).collect();
        let vectorizer = TfidfVectorizer::fit(&train_docs);
        let train_rows = vectorizer.transform_all(&train_docs);

        let classifier = match self.kind {
            ModelKind::NaiveBayes => Classifier::NaiveBayes(NaiveBayes::fit(
                &train_rows,
                &train_labels,
                vectorizer.len(),
                NB_ALPHA,
            )),
            ModelKind::RandomForest => Classifier::RandomForest(
                RandomForest::fit(&train_rows, &train_labels, vectorizer.len(), &self.params)
                    .compile(),
            ),
        };

        let model = TagModel {
            identity: ModelIdentity {
                kind: self.kind,
                sample_rate: self.sample_rate,
                rules: self.rules.clone(),
                tag: tag.to_string(),
            },
            vectorizer,
            classifier,
        };

        let actual: Vec<bool> = test.iter().map(|&i| labels[i]).collect();
        let predicted: Vec<bool> = test.iter().map(|&i| model.predict(&self.chunks[i])).collect();
        let metrics = score(&actual, &predicted);

        let model_path = self.out_dir.join(model.identity.file_name());
        model.save(&model_path)?;
        info!(
            tag,
            kind = %self.kind,
            accuracy = metrics.accuracy,
            f1 = metrics.f1,
            "trained tag classifier"
        );

        Ok(TagReport {
            tag: tag.to_string(),
            metrics,
            model_path,
            train_rows: train.len(),
            test_rows: test.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_corpus(dir: &Path) -> PathBuf {
        let mut table = Table::new(vec![CHUNK_COLUMN.into(), "fraud".into(), "waste".into()]);
        for i in 0..25 {
            table.push_row(vec![format!("invoice fraud scheme case{i}"), "1".into(), "0".into()]);
            table.push_row(vec![format!("budget waste overrun item{i}"), "0".into(), "1".into()]);
        }
        let path = dir.join("audit.csv");
        table.write(&path).unwrap();
        path
    }

    #[test]
    fn split_holds_out_ceiling_of_twenty_percent() {
        let (train, test) = train_test_split(11, 42);
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);

        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort();
        assert_eq!(all, (0..11).collect::<Vec<_>>());
        assert_eq!(train_test_split(11, 42), (train, test));
    }

    #[test]
    fn model_kind_parses_and_displays() {
        assert_eq!("rf".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
        assert_eq!(ModelKind::NaiveBayes.to_string(), "NB");
        assert!("svm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn naive_bayes_reports_one_tag_at_a_time() {
        let dir = tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let trainer =
            Trainer::from_corpus(&corpus, ModelKind::NaiveBayes, 0.5, dir.path().join("clf")).unwrap();

        let mut reports = trainer.reports();
        let first = reports.next().unwrap().unwrap();
        assert_eq!(first.tag, "fraud");
        assert_eq!(first.test_rows, 10);
        assert_eq!(first.metrics.accuracy, 1.0);
        assert_eq!(first.model_path, dir.path().join("clf").join("NB_0.5-fraud.json"));

        let second = reports.next().unwrap().unwrap();
        assert_eq!(second.tag, "waste");
        assert!(reports.next().is_none());
    }

    #[test]
    fn saved_forest_predicts_after_reload() {
        let dir = tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let params = ForestParams {
            n_estimators: 10,
            ..ForestParams::default()
        };
        let trainer = Trainer::from_corpus(&corpus, ModelKind::RandomForest, 1.0, dir.path())
            .unwrap()
            .with_params(params);

        let report = trainer.reports().next().unwrap().unwrap();
        let model = TagModel::load(&report.model_path).unwrap();
        assert_eq!(model.tag(), "fraud");
        assert!(model.predict_context("nothing here|another invoice fraud scheme"));
        assert!(!model.predict_context("budget waste overrun"));
    }

    #[test]
    fn empty_corpus_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        Table::new(vec![CHUNK_COLUMN.into(), "fraud".into()])
            .write(&path)
            .unwrap();

        let trainer = Trainer::from_corpus(&path, ModelKind::NaiveBayes, 1.0, dir.path()).unwrap();
        assert!(trainer.reports().next().unwrap().is_err());
    }
}
