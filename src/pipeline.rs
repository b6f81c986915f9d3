//! End-to-end pipeline runs and the job launcher.
//!
//! A [`Pipeline`] extracts fresh text, joins it with the metadata source, labels every tag
//! with its trained model and merges the result into the destination. Each stage change
//! goes out on the progress channel; the pipeline itself never talks to the ledger.

mod jobs;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::classifier::TagModel;
use crate::config::{Destination, PipelineConfig, Project, SourceSettings};
use crate::dataset::{TEXT_COLUMN, Table};
use crate::extract::{ExtractOptions, ExtractedFile, Extractor, contains_keyword};
use crate::extrapolate::flag;
use crate::models::{KeywordSet, RunId, split_context};
use crate::progress::{ProgressSender, StageMachine};
use crate::store::{StoreReport, finalize_text, open_destination};

pub use jobs::{
    EmbedSettings, ExtractJob, ExtrapolateJob, JobLauncher, RunningJobs, run_extraction,
    run_extrapolation, run_training, run_training_set,
};

/// Builds the extractor of a configured source, honouring file-extract mode.
pub fn source_extractor(
    source: &SourceSettings,
    keywords: Vec<String>,
    options: ExtractOptions,
) -> Result<Extractor> {
    let extractor = Extractor::new(source.reader()?, keywords, options)?;
    if !source.file_extract {
        return Ok(extractor);
    }
    let dir = source
        .file_extract_dir
        .as_ref()
        .context("file_extract is set but file_extract_dir is missing")?;
    Ok(extractor.with_file_extract(dir))
}

/// Row-level label of one context string.
///
/// Only chunks holding one of the tag's keywords are shown to the model; with no
/// keywords every chunk is.
pub fn classify_context(model: &TagModel, context: &str, keywords: &[String]) -> bool {
    split_context(context)
        .filter(|chunk| keywords.is_empty() || contains_keyword(chunk, keywords))
        .any(|chunk| model.predict(chunk))
}

/// Reads every file of a metadata source into one table with the configured fields.
pub fn read_metadata(source: &SourceSettings) -> Result<Table> {
    let reader = source.reader()?;
    reader
        .validate(&source.files)
        .context("Metadata schema check failed")?;

    let mut table = Table::new(source.fields.clone());
    for file in &source.files {
        let records = reader
            .read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        for record in records {
            table.push_row(
                source
                    .fields
                    .iter()
                    .map(|f| record.get(f).unwrap_or_default().to_string())
                    .collect(),
            );
        }
    }
    Ok(table)
}

/// Full outer join of metadata and classified text on their identifier columns.
///
/// The result is keyed by `text_id`, followed by the metadata fields and then the
/// remaining text columns. Metadata rows come first in their own order, each followed by
/// its matches; text rows without metadata are appended at the end. Tag cells of rows with
/// no text are `0`.
pub fn outer_join(
    metadata: &Table,
    metadata_id: &str,
    text: &Table,
    text_id: &str,
    tags: &[String],
) -> Result<Table> {
    let mi = metadata
        .require_column(metadata_id)
        .context("Metadata has no identifier column")?;
    let ti = text
        .require_column(text_id)
        .context("Extracted text has no identifier column")?;

    let mut headers = vec![text_id.to_string()];
    let meta_cols: Vec<usize> = (0..metadata.headers().len()).filter(|&i| i != mi).collect();
    headers.extend(meta_cols.iter().map(|&i| metadata.headers()[i].clone()));
    let text_cols: Vec<usize> = (0..text.headers().len())
        .filter(|&i| i != ti && !headers.contains(&text.headers()[i]))
        .collect();
    headers.extend(text_cols.iter().map(|&i| text.headers()[i].clone()));

    let blank_text: Vec<String> = text_cols
        .iter()
        .map(|&i| {
            if tags.contains(&text.headers()[i]) {
                flag(false)
            } else {
                String::new()
            }
        })
        .collect();

    let mut by_id: HashMap<&str, Vec<usize>> = HashMap::new();
    for (r, row) in text.rows().iter().enumerate() {
        by_id.entry(row[ti].trim()).or_default().push(r);
    }

    let mut joined = Table::new(headers);
    let mut matched: HashSet<&str> = HashSet::new();
    for meta in metadata.rows() {
        let key = meta[mi].trim();
        let meta_values = meta_cols.iter().map(|&i| meta[i].clone());
        match by_id.get(key) {
            Some(rows) => {
                matched.insert(key);
                for &r in rows {
                    let row = &text.rows()[r];
                    joined.push_row(
                        std::iter::once(key.to_string())
                            .chain(meta_values.clone())
                            .chain(text_cols.iter().map(|&i| row[i].clone()))
                            .collect(),
                    );
                }
            }
            None => joined.push_row(
                std::iter::once(key.to_string())
                    .chain(meta_values)
                    .chain(blank_text.iter().cloned())
                    .collect(),
            ),
        }
    }
    for row in text.rows() {
        let key = row[ti].trim();
        if matched.contains(key) {
            continue;
        }
        joined.push_row(
            std::iter::once(key.to_string())
                .chain(meta_cols.iter().map(|_| String::new()))
                .chain(text_cols.iter().map(|&i| row[i].clone()))
                .collect(),
        );
    }
    Ok(joined)
}

/// What a finished pipeline run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub extracted: Vec<ExtractedFile>,
    /// Rows handed to the destination after the join.
    pub rows: usize,
    pub report: StoreReport,
    pub location: String,
}

/// One configured pipeline job, ready to run.
pub struct Pipeline {
    run_id: RunId,
    config: PipelineConfig,
    extraction: SourceSettings,
    metadata: Option<SourceSettings>,
    keywords: KeywordSet,
    models: Vec<TagModel>,
    out_dir: PathBuf,
    destination: Destination,
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl Pipeline {
    /// Loads settings, keywords and every tag's model from the project.
    ///
    /// Relative classifier paths resolve against the project root and a relative database
    /// path against the project's `db/` directory.
    pub fn new(project: &Project, run_id: RunId, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let settings = project.load_settings()?;
        let (name, extraction) = settings
            .extraction()
            .context("settings.json defines no extraction source")?;
        debug!(source = name, "extraction source");
        let metadata = settings.metadata().map(|(_, s)| s.clone());
        let keywords = project.load_keywords()?;

        let mut models = Vec::with_capacity(config.tags.len());
        for tag in &config.tags {
            let path = resolve(project.root(), &config.classifiers[tag]);
            let model = TagModel::load(&path)?;
            if model.tag() != tag {
                warn!(tag = %tag, model_tag = model.tag(), path = %path.display(), "classifier was trained for another tag");
            }
            models.push(model);
        }

        let destination = match &config.destination {
            Destination::Table {
                database,
                table,
                columns,
            } => Destination::Table {
                database: resolve(&project.db_dir(), database),
                table: table.clone(),
                columns: columns.clone(),
            },
            Destination::File { path } => Destination::File {
                path: resolve(project.root(), path),
            },
        };

        Ok(Self {
            out_dir: project.csv_dir(&run_id),
            run_id,
            extraction: extraction.clone(),
            metadata,
            keywords,
            models,
            destination,
            config,
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Where extracted files of this run land.
    pub fn output_dir(&self) -> &Path {
        &self.out_dir
    }

    fn advance(&self, stages: &mut StageMachine, progress: &ProgressSender) {
        if let Some(stage) = stages.advance() {
            info!(run = %self.run_id, stage = %stage, "pipeline stage");
            progress.stage(&stage);
        }
    }

    fn extract(&self, pool: &ThreadPool) -> Result<(Vec<ExtractedFile>, Vec<String>)> {
        let restricted = self.keywords.restricted_to(&self.config.tags);
        let keywords = if restricted.is_empty() {
            self.keywords.all_keywords()
        } else {
            restricted.all_keywords()
        };
        if keywords.is_empty() {
            anyhow::bail!("No keywords configured");
        }
        let options = ExtractOptions {
            window: self.config.window,
            mode: self.config.mode,
            keep_numbers: self.config.keep_numbers,
        };
        let extractor = source_extractor(&self.extraction, keywords, options)?;
        let files = if self.config.files.is_empty() {
            &self.extraction.files
        } else {
            &self.config.files
        };
        let extracted = extractor.run(files, &self.out_dir, pool, |i, n, path| {
            debug!(run = %self.run_id, file = %path.display(), "extracting {i}/{n}");
        })?;
        Ok((extracted, extractor.output_headers()))
    }

    /// Labels every row for `tag`, the configured name the column is stored under.
    fn classify(&self, tag: &str, model: &TagModel, text: &mut Table, pool: &ThreadPool) -> Result<()> {
        let index = text.require_column(TEXT_COLUMN)?;
        let keywords = self.keywords.keywords_for(tag);
        let labels: Vec<String> = pool.install(|| {
            text.rows()
                .par_iter()
                .map(|row| flag(classify_context(model, &row[index], keywords)))
                .collect()
        });
        let positives = labels.iter().filter(|l| l.as_str() == "1").count();
        info!(run = %self.run_id, tag, model = model.tag(), rows = labels.len(), positives, "classified");
        text.set_column(tag, labels)
    }

    /// Runs every stage in order, reporting each one on `progress`.
    pub fn run(&self, pool: &ThreadPool, progress: &ProgressSender) -> Result<PipelineOutcome> {
        let mut stages = StageMachine::new(self.config.tags.clone());

        self.advance(&mut stages, progress);
        let (extracted, headers) = self.extract(pool)?;

        self.advance(&mut stages, progress);
        let mut text = Table::new(headers);
        for file in &extracted {
            text.extend_from(&Table::read(&file.output)?);
        }
        let metadata = self.metadata.as_ref().map(read_metadata).transpose()?;

        for (tag, model) in self.config.tags.iter().zip(&self.models) {
            self.advance(&mut stages, progress);
            self.classify(tag, model, &mut text, pool)?;
        }

        self.advance(&mut stages, progress);
        let id = self.extraction.id.as_str();
        let mut rows = match (&metadata, &self.metadata) {
            (Some(table), Some(source)) => outer_join(table, &source.id, &text, id, &self.config.tags)?,
            _ => text,
        };
        let extract_field = self.extraction.extract.as_deref().unwrap_or(TEXT_COLUMN);
        finalize_text(&mut rows, extract_field, self.config.keep_text);

        let row_count = rows.len();
        let mut target = open_destination(&self.destination, id, &self.config.tags, rows.headers())?;
        let report = target.merge(rows)?;
        let location = target.location();

        self.advance(&mut stages, progress);
        Ok(PipelineOutcome {
            extracted,
            rows: row_count,
            report,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        let mut table = Table::new(headers.iter().map(|h| h.to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|c| c.to_string()).collect());
        }
        table
    }

    #[test]
    fn outer_join_keeps_rows_from_both_sides() {
        let metadata = table(&["key", "date"], &[&["1", "2020"], &["2", "2021"]]);
        let text = table(&["id", "text", "fraud"], &[&["2", "a|b", "1"], &["3", "c", "0"]]);

        let joined = outer_join(&metadata, "key", &text, "id", &["fraud".into()]).unwrap();

        assert_eq!(joined.headers(), &["id", "date", "text", "fraud"]);
        assert_eq!(
            joined.rows(),
            &[
                vec!["1".to_string(), "2020".into(), "".into(), "0".into()],
                vec!["2".to_string(), "2021".into(), "a|b".into(), "1".into()],
                vec!["3".to_string(), "".into(), "c".into(), "0".into()],
            ]
        );
    }

    #[test]
    fn outer_join_does_not_repeat_shared_columns() {
        let metadata = table(&["id", "title"], &[&["1", "meta title"]]);
        let text = table(&["id", "title", "text"], &[&["1", "text title", "x"]]);

        let joined = outer_join(&metadata, "id", &text, "id", &[]).unwrap();

        assert_eq!(joined.headers(), &["id", "title", "text"]);
        assert_eq!(joined.rows()[0][1], "meta title");
    }

    #[test]
    fn outer_join_requires_identifier_columns() {
        let metadata = table(&["key"], &[]);
        let text = table(&["id", "text"], &[]);
        assert!(outer_join(&metadata, "missing", &text, "id", &[]).is_err());
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        assert_eq!(resolve(Path::new("/p"), Path::new("m.json")), PathBuf::from("/p/m.json"));
        assert_eq!(resolve(Path::new("/p"), Path::new("/abs.json")), PathBuf::from("/abs.json"));
    }
}
