//! Training corpus construction from extracted chunks and one rule file.
//!
//! Each sampled row is scanned rule by rule. Matching chunks become positive examples
//! carrying the rule's encoding. With negative sampling on, chunks that match no rule
//! become all-zero examples while the rule's running budget lasts: every positive adds
//! one, every negative costs one per tag. The pooled examples are ordered by priority,
//! de-duplicated on chunk text, capped so no source file contributes more negatives
//! than positives, and shuffled.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::dataset::{CHUNK_COLUMN, TEXT_COLUMN, Table};
use crate::models::{RuleFile, TagEncoding, split_context};

/// Knobs of a training-set build.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOptions {
    /// Fraction of each file's rows to scan, in `(0, 1]`.
    pub sample: f64,
    pub negative_sampling: bool,
    pub seed: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            sample: 1.0,
            negative_sampling: false,
            seed: 42,
        }
    }
}

/// One candidate training row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub chunk: String,
    /// Priority of the rule that produced the example, positive or negative.
    pub priority: i64,
    pub encoding: TagEncoding,
    pub positive: bool,
}

/// What one source file contributed after de-duplication and capping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContribution {
    pub file: PathBuf,
    pub positives: usize,
    pub negatives: usize,
}

/// Result of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSet {
    pub output: PathBuf,
    pub rows: usize,
    pub files: Vec<FileContribution>,
}

/// Builds a training corpus for one rule file.
pub struct TrainingSetBuilder<'a> {
    rules: &'a RuleFile,
    options: TrainingOptions,
}

impl<'a> TrainingSetBuilder<'a> {
    pub fn new(rules: &'a RuleFile, options: TrainingOptions) -> Self {
        Self { rules, options }
    }

    /// Examples produced by one context string.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::models::RuleFile;
    /// use craml::training::{TrainingOptions, TrainingSetBuilder};
    ///
    /// let rules = RuleFile::from_reader("r", "rule,prio,fraud\nfraud,1,1\n".as_bytes()).unwrap();
    /// let options = TrainingOptions { negative_sampling: true, ..TrainingOptions::default() };
    /// let builder = TrainingSetBuilder::new(&rules, options);
    ///
    /// let examples = builder.row_examples("calm start|big fraud|quiet end|more quiet");
    /// let kinds: Vec<bool> = examples.iter().map(|e| e.positive).collect();
    /// assert_eq!(kinds, vec![true, false]);
    /// assert_eq!(examples[1].chunk, "quiet end");
    /// ```
    pub fn row_examples(&self, context: &str) -> Vec<Example> {
        let width = self.rules.tags.len() as i64;
        let mut examples = Vec::new();

        for rule in &self.rules.rules {
            let mut budget: i64 = 0;
            for chunk in split_context(context) {
                if rule.pattern.is_match(chunk) {
                    examples.push(Example {
                        chunk: chunk.to_string(),
                        priority: rule.priority,
                        encoding: rule.encoding.clone(),
                        positive: true,
                    });
                    budget += 1;
                } else if self.options.negative_sampling
                    && budget > 0
                    && !self.rules.any_match(chunk)
                {
                    examples.push(Example {
                        chunk: chunk.to_string(),
                        priority: rule.priority,
                        encoding: TagEncoding::zeros(self.rules.tags.len()),
                        positive: false,
                    });
                    budget -= width;
                }
            }
        }
        examples
    }

    /// Samples a file's rows and collects their examples on the pool.
    pub fn file_examples(&self, path: &Path, pool: &ThreadPool) -> Result<Vec<Example>> {
        let table = Table::read(path)?;
        let text = table
            .require_column(TEXT_COLUMN)
            .with_context(|| format!("Not an extraction file: {}", path.display()))?;
        if table.is_empty() {
            return Ok(Vec::new());
        }

        let take = sample_size(table.len(), self.options.sample);
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let rows: Vec<&Vec<String>> = table.rows().choose_multiple(&mut rng, take).collect();

        let examples: Vec<Example> = pool.install(|| {
            rows.par_iter()
                .flat_map_iter(|row| self.row_examples(&row[text]))
                .collect()
        });
        Ok(examples)
    }

    /// Builds the corpus from every extracted file and writes it to `output`.
    pub fn build(&self, files: &[PathBuf], output: &Path, pool: &ThreadPool) -> Result<TrainingSet> {
        info!(
            rules = %self.rules.name,
            files = files.len(),
            sample = self.options.sample,
            negatives = self.options.negative_sampling,
            "building training set"
        );

        let mut pooled: Vec<(usize, Example)> = Vec::new();
        for (index, file) in files.iter().enumerate() {
            let examples = self.file_examples(file, pool)?;
            info!(file = %file.display(), examples = examples.len(), "scanned file {}/{}", index + 1, files.len());
            pooled.extend(examples.into_iter().map(|e| (index, e)));
        }

        let mut kept = dedup_by_priority(pooled);
        let contributions = cap_negatives(&mut kept, files);

        let mut rng = StdRng::seed_from_u64(self.options.seed);
        kept.shuffle(&mut rng);

        let mut headers = vec![CHUNK_COLUMN.to_string()];
        headers.extend(self.rules.tags.iter().cloned());
        let mut table = Table::new(headers);
        for (_, example) in &kept {
            let mut row = vec![example.chunk.clone()];
            row.extend(
                example
                    .encoding
                    .values()
                    .iter()
                    .map(|&v| if v { "1" } else { "0" }.to_string()),
            );
            table.push_row(row);
        }
        if table.is_empty() {
            warn!(rules = %self.rules.name, "training set is empty");
        }
        table.write(output)?;
        info!(output = %output.display(), rows = table.len(), "training set written");

        Ok(TrainingSet {
            output: output.to_path_buf(),
            rows: table.len(),
            files: contributions,
        })
    }
}

fn sample_size(rows: usize, fraction: f64) -> usize {
    let fraction = fraction.clamp(0.0, 1.0);
    ((rows as f64) * fraction).round() as usize
}

/// Keeps the highest-priority occurrence of each chunk; positives win ties.
fn dedup_by_priority(mut examples: Vec<(usize, Example)>) -> Vec<(usize, Example)> {
    examples.sort_by(|(_, a), (_, b)| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.positive.cmp(&a.positive))
    });
    let mut seen = HashSet::new();
    examples.retain(|(_, e)| seen.insert(e.chunk.clone()));
    examples
}

/// Drops trailing negatives of any file that has more negatives than positives.
fn cap_negatives(examples: &mut Vec<(usize, Example)>, files: &[PathBuf]) -> Vec<FileContribution> {
    let mut positives = vec![0usize; files.len()];
    for (file, example) in examples.iter() {
        if example.positive {
            positives[*file] += 1;
        }
    }

    let mut negatives = vec![0usize; files.len()];
    examples.retain(|(file, example)| {
        if example.positive {
            return true;
        }
        if negatives[*file] < positives[*file] {
            negatives[*file] += 1;
            true
        } else {
            false
        }
    });

    files
        .iter()
        .enumerate()
        .map(|(i, file)| FileContribution {
            file: file.clone(),
            positives: positives[i],
            negatives: negatives[i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::build_pool;
    use tempfile::tempdir;

    fn rule_file(csv: &str) -> RuleFile {
        RuleFile::from_reader("rules", csv.as_bytes()).unwrap()
    }

    fn with_negatives() -> TrainingOptions {
        TrainingOptions {
            negative_sampling: true,
            ..TrainingOptions::default()
        }
    }

    fn example(chunk: &str, priority: i64, positive: bool) -> Example {
        Example {
            chunk: chunk.into(),
            priority,
            encoding: TagEncoding::new(vec![positive]),
            positive,
        }
    }

    #[test]
    fn negatives_only_follow_a_positive() {
        let rules = rule_file("rule,prio,t\nfraud,1,1\n");
        let builder = TrainingSetBuilder::new(&rules, with_negatives());

        let examples = builder.row_examples("before|fraud one|after|fraud two|tail");
        let chunks: Vec<&str> = examples.iter().map(|e| e.chunk.as_str()).collect();
        assert_eq!(chunks, vec!["fraud one", "after", "fraud two", "tail"]);
    }

    #[test]
    fn negative_costs_one_unit_per_tag() {
        let rules = rule_file("rule,prio,a,b\nfraud,1,1,0\n");
        let builder = TrainingSetBuilder::new(&rules, with_negatives());

        // Budget 1 after the positive, then 1 - 2 after the first negative.
        let examples = builder.row_examples("fraud|x|y");
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1].encoding.values(), &[false, false]);
    }

    #[test]
    fn chunks_matching_another_rule_are_never_negatives() {
        let rules = rule_file("rule,prio,t\nfraud,1,1\nwaste,0,0\n");
        let builder = TrainingSetBuilder::new(&rules, with_negatives());

        let examples = builder.row_examples("fraud|waste");
        assert!(examples.iter().all(|e| e.positive));
    }

    #[test]
    fn without_negative_sampling_only_positives() {
        let rules = rule_file("rule,prio,t\nfraud,1,1\n");
        let builder = TrainingSetBuilder::new(&rules, TrainingOptions::default());
        assert_eq!(builder.row_examples("fraud|other").len(), 1);
    }

    #[test]
    fn dedup_keeps_highest_priority() {
        let kept = dedup_by_priority(vec![
            (0, example("same text", 1, false)),
            (0, example("same text", 3, true)),
            (0, example("other", 2, true)),
        ]);
        let pairs: Vec<(&str, i64)> = kept.iter().map(|(_, e)| (e.chunk.as_str(), e.priority)).collect();
        assert_eq!(pairs, vec![("same text", 3), ("other", 2)]);
    }

    #[test]
    fn cap_limits_negatives_per_file() {
        let files = vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")];
        let mut examples = vec![
            (0, example("p", 1, true)),
            (0, example("n1", 1, false)),
            (0, example("n2", 1, false)),
            (1, example("n3", 1, false)),
        ];
        let counts = cap_negatives(&mut examples, &files);

        assert_eq!(examples.len(), 2);
        assert_eq!((counts[0].positives, counts[0].negatives), (1, 1));
        assert_eq!((counts[1].positives, counts[1].negatives), (0, 0));
    }

    #[test]
    fn sample_size_rounds() {
        assert_eq!(sample_size(10, 0.25), 3);
        assert_eq!(sample_size(10, 1.0), 10);
        assert_eq!(sample_size(10, 2.0), 10);
    }

    #[test]
    fn build_writes_chunk_and_tag_columns() {
        let dir = tempdir().unwrap();
        let mut input = Table::new(vec!["id".into(), TEXT_COLUMN.into()]);
        input.push_row(vec!["1".into(), "fraud here|calm".into()]);
        input.push_row(vec!["2".into(), "fraud here|waste there".into()]);
        let path = dir.path().join("part.csv");
        input.write(&path).unwrap();

        let rules = rule_file("rule,prio,a,b\nfraud,1,1,0\nwaste,2,0,1\n");
        let pool = build_pool(2).unwrap();
        let output = dir.path().join("train").join("rules.csv");
        let set = TrainingSetBuilder::new(&rules, TrainingOptions::default())
            .build(&[path], &output, &pool)
            .unwrap();

        assert_eq!(set.rows, 2);
        let written = Table::read(&output).unwrap();
        assert_eq!(written.headers(), &["chunk", "a", "b"]);
        let mut rows = written.into_rows();
        rows.sort();
        assert_eq!(rows, vec![vec!["fraud here", "1", "0"], vec!["waste there", "0", "1"]]);
    }
}
