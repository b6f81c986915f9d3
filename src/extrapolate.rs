//! Rule matching over extracted chunks ("extrapolation").
//!
//! Literal mode resolves every rule file independently to its single highest-priority
//! match and applies that rule's encoding to the row. Rule files sharing a tag are
//! OR-combined on that column. Embedding mode lives in [`SimilarityTagger`].

mod similarity;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::info;

use crate::dataset::{TEXT_COLUMN, Table};
use crate::models::{RuleFile, split_context};
use crate::utils::file_stem;

pub use similarity::{EmbedError, SimilarityTagger, cosine_similarity, evidence_column};

/// Applies one or more rule files to extracted rows.
///
/// # Examples
///
/// ```
/// use craml::extrapolate::Extrapolator;
/// use craml::models::RuleFile;
///
/// let csv = "rule,prio,tagA,tagB\nfraud,1,1,0\nwaste,2,0,1\n";
/// let rules = RuleFile::from_reader("demo", csv.as_bytes()).unwrap();
/// let extrapolator = Extrapolator::new(vec![rules]);
///
/// assert_eq!(extrapolator.tags(), &["tagA", "tagB"]);
/// assert_eq!(extrapolator.classify("fraud and waste"), vec![false, true]);
/// ```
#[derive(Debug, Clone)]
pub struct Extrapolator {
    rule_files: Vec<RuleFile>,
    /// Union of the rule files' tags in first-seen order.
    tags: Vec<String>,
    /// For each rule file, the offset in `tags` of each of its columns.
    columns: Vec<Vec<usize>>,
}

impl Extrapolator {
    pub fn new(rule_files: Vec<RuleFile>) -> Self {
        let mut tags: Vec<String> = Vec::new();
        let columns = rule_files
            .iter()
            .map(|file| {
                file.tags
                    .iter()
                    .map(|tag| match tags.iter().position(|t| t == tag) {
                        Some(index) => index,
                        None => {
                            tags.push(tag.clone());
                            tags.len() - 1
                        }
                    })
                    .collect()
            })
            .collect();

        Self {
            rule_files,
            tags,
            columns,
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn rule_files(&self) -> &[RuleFile] {
        &self.rule_files
    }

    /// Tags asserted for one context string, in [`tags`](Self::tags) order.
    pub fn classify(&self, context: &str) -> Vec<bool> {
        let chunks: Vec<&str> = split_context(context).collect();
        let mut asserted = vec![false; self.tags.len()];

        for (file, columns) in self.rule_files.iter().zip(&self.columns) {
            let Some(winner) = file.best_match(&chunks) else {
                continue;
            };
            let encoding = &file.rules[winner.rule_index].encoding;
            for (offset, &column) in columns.iter().enumerate() {
                asserted[column] |= encoding.get(offset);
            }
        }
        asserted
    }

    /// Adds (or OR-combines into) one 0/1 column per tag.
    ///
    /// Returns the number of rows with at least one tag asserted.
    pub fn apply(&self, table: &mut Table, pool: &ThreadPool) -> Result<usize> {
        let text = table.require_column(TEXT_COLUMN)?;
        let labels: Vec<Vec<bool>> = pool.install(|| {
            table
                .rows()
                .par_iter()
                .map(|row| self.classify(&row[text]))
                .collect()
        });

        for (offset, tag) in self.tags.iter().enumerate() {
            let existing = table.column_index(tag);
            let values = table
                .rows()
                .iter()
                .zip(&labels)
                .map(|(row, label)| {
                    let previous = existing.is_some_and(|i| is_flag_set(&row[i]));
                    flag(previous || label[offset])
                })
                .collect();
            table.set_column(tag, values)?;
        }

        Ok(labels.iter().filter(|label| label.iter().any(|&v| v)).count())
    }

    /// Classifies every extracted file into `out_dir/<stem>.csv`.
    pub fn run(&self, files: &[PathBuf], out_dir: &Path, pool: &ThreadPool) -> Result<Vec<PathBuf>> {
        write_classified(files, out_dir, |table| self.apply(table, pool))
    }
}

/// Reads each file, lets `classify` add its columns, and writes the result.
pub(crate) fn write_classified(
    files: &[PathBuf],
    out_dir: &Path,
    mut classify: impl FnMut(&mut Table) -> Result<usize>,
) -> Result<Vec<PathBuf>> {
    let mut outputs = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        info!(file = %file.display(), "classifying file {}/{}", i + 1, files.len());
        let mut table = Table::read(file)?;
        let tagged = classify(&mut table)
            .with_context(|| format!("Failed to classify {}", file.display()))?;

        let output = out_dir.join(format!("{}.csv", file_stem(file)));
        table.write(&output)?;
        info!(file = %file.display(), rows = table.len(), tagged, "classified");
        outputs.push(output);
    }
    Ok(outputs)
}

pub(crate) fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

pub(crate) fn is_flag_set(cell: &str) -> bool {
    matches!(cell.trim(), "1" | "1.0" | "true" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::build_pool;
    use tempfile::tempdir;

    fn rules(name: &str, csv: &str) -> RuleFile {
        RuleFile::from_reader(name, csv.as_bytes()).unwrap()
    }

    #[test]
    fn highest_priority_rule_wins() {
        let ex = Extrapolator::new(vec![rules(
            "r",
            "rule,prio,tagA,tagB\nfraud,1,1,0\nwaste,2,0,1\n",
        )]);

        assert_eq!(ex.classify("fraud|and waste here"), vec![false, true]);
        assert_eq!(ex.classify("only fraud"), vec![true, false]);
        assert_eq!(ex.classify("nothing"), vec![false, false]);
    }

    #[test]
    fn single_rule_round_trip() {
        let ex = Extrapolator::new(vec![rules("r", "rule,prio,a,b,c\nleak,0,1,0,1\n")]);
        assert_eq!(ex.classify("leak"), vec![true, false, true]);
    }

    #[test]
    fn shared_tags_are_or_combined_across_files() {
        let first = rules("first", "rule,prio,tagA\nfraud,1,1\n");
        let second = rules("second", "rule,prio,tagA,tagC\nfraud,5,0,1\n");
        let ex = Extrapolator::new(vec![first, second]);

        assert_eq!(ex.tags(), &["tagA", "tagC"]);
        assert_eq!(ex.classify("fraud"), vec![true, true]);
    }

    #[test]
    fn apply_adds_columns_and_keeps_prior_assertions() {
        let mut table = Table::new(vec!["id".into(), TEXT_COLUMN.into(), "tagA".into()]);
        table.push_row(vec!["1".into(), "clean text".into(), "1".into()]);
        table.push_row(vec!["2".into(), "waste".into(), "0".into()]);

        let ex = Extrapolator::new(vec![rules("r", "rule,prio,tagA,tagB\nwaste,1,0,1\n")]);
        let pool = build_pool(2).unwrap();
        let tagged = ex.apply(&mut table, &pool).unwrap();

        assert_eq!(tagged, 1);
        assert_eq!(table.headers(), &["id", "text", "tagA", "tagB"]);
        assert_eq!(table.rows()[0][2..], ["1", "0"]);
        assert_eq!(table.rows()[1][2..], ["0", "1"]);
    }

    #[test]
    fn run_writes_one_classified_file_per_input() {
        let dir = tempdir().unwrap();
        let mut input = Table::new(vec!["id".into(), TEXT_COLUMN.into()]);
        input.push_row(vec!["1".into(), "big fraud|small".into()]);
        let path = dir.path().join("part.csv");
        input.write(&path).unwrap();

        let ex = Extrapolator::new(vec![rules("r", "rule,prio,tagA\nfraud,1,1\n")]);
        let pool = build_pool(1).unwrap();
        let outputs = ex.run(&[path], &dir.path().join("out"), &pool).unwrap();

        assert_eq!(outputs, vec![dir.path().join("out").join("part.csv")]);
        let written = Table::read(&outputs[0]).unwrap();
        assert_eq!(written.rows()[0], vec!["1", "big fraud|small", "1"]);
    }
}
