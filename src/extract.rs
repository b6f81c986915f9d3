//! Keyword-window extraction over whole sources.
//!
//! Every record is cleaned, split into units and cut into one [`Chunk`] per keyword
//! occurrence. Records without any keyword are rejected before cleaning. Work is spread
//! over a rayon pool one record at a time; each source file produces one output CSV with
//! the source's non-text fields followed by a `text` column of pipe-joined chunks.

mod clean;
mod numbers;
mod sample;
mod window;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::dataset::{TEXT_COLUMN, Table};
use crate::models::{Chunk, ChunkMode, Record, join_chunks};
use crate::source::{FileResolver, SourceReader};
use crate::utils::file_stem;

pub use clean::clean_text;
pub use numbers::{number_to_words, spell_out_numbers, year_to_words};
pub use sample::{ChunkCount, ChunkSampler, SampleMode, extraction_files, recentre};
pub use window::{context_windows, split_units};

/// Knobs shared by every record of an extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Units kept either side of a keyword.
    pub window: usize,
    pub mode: ChunkMode,
    /// Spell numbers out instead of dropping them.
    pub keep_numbers: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            window: 6,
            mode: ChunkMode::Word,
            keep_numbers: false,
        }
    }
}

/// Case-insensitive check for any keyword anywhere in the raw text.
pub fn contains_keyword(text: &str, keywords: &[String]) -> bool {
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .any(|k| lowered.contains(&k.to_lowercase()))
}

/// Produces the chunks of one raw text.
///
/// # Examples
///
/// ```
/// use craml::extract::{ExtractOptions, extract_chunks};
///
/// let keywords = vec!["fraud".to_string()];
/// let options = ExtractOptions { window: 1, ..ExtractOptions::default() };
///
/// let chunks = extract_chunks("We found FRAUD in 3 ledgers.", &keywords, &options);
/// assert_eq!(chunks[0].text(), "found fraud in");
/// assert!(extract_chunks("All clear.", &keywords, &options).is_empty());
/// ```
pub fn extract_chunks(raw: &str, keywords: &[String], options: &ExtractOptions) -> Vec<Chunk> {
    if !contains_keyword(raw, keywords) {
        return Vec::new();
    }
    let cleaned = clean_text(raw, options.keep_numbers).to_lowercase();
    context_windows(&cleaned, keywords, options.window, options.mode)
}

/// What one source file produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub source: PathBuf,
    pub output: PathBuf,
    pub rows: usize,
}

/// Runs extraction for one configured source.
pub struct Extractor {
    reader: SourceReader,
    keywords: Vec<String>,
    options: ExtractOptions,
    /// Base directory when the extract field holds file names.
    file_extract_dir: Option<PathBuf>,
}

impl Extractor {
    /// Creates an extractor.
    ///
    /// # Errors
    ///
    /// Fails if the reader's schema has no extract field.
    pub fn new(reader: SourceReader, keywords: Vec<String>, options: ExtractOptions) -> Result<Self> {
        if reader.schema().extract.is_none() {
            anyhow::bail!("Source has no extract field configured");
        }
        Ok(Self {
            reader,
            keywords,
            options,
            file_extract_dir: None,
        })
    }

    /// Treats the extract field as file references under `dir`.
    pub fn with_file_extract(mut self, dir: impl AsRef<Path>) -> Self {
        self.file_extract_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Output header: passthrough fields then `text`.
    pub fn output_headers(&self) -> Vec<String> {
        self.reader
            .schema()
            .passthrough_fields()
            .map(str::to_string)
            .chain(std::iter::once(TEXT_COLUMN.to_string()))
            .collect()
    }

    /// Builds the output row of one record, or `None` if it yields nothing.
    pub fn process_record(&self, record: &Record, resolver: Option<&FileResolver>) -> Option<Vec<String>> {
        let schema = self.reader.schema();
        let extract = schema.extract.as_deref()?;
        let cell = record.get(extract)?;

        let text = match resolver {
            Some(resolver) => resolver.resolve(cell)?,
            None => cell.to_string(),
        };
        if text.trim().is_empty() {
            return None;
        }

        let chunks = extract_chunks(&text, &self.keywords, &self.options);
        if chunks.is_empty() {
            return None;
        }
        let context = join_chunks(&chunks);

        let id = record.get(&schema.id).unwrap_or_default();
        if id.trim().is_empty() || context.is_empty() {
            return None;
        }

        let mut row: Vec<String> = schema
            .passthrough_fields()
            .map(|f| record.get(f).unwrap_or_default().to_string())
            .collect();
        row.push(context);
        Some(row)
    }

    /// Extracts every file into `out_dir/<stem>.csv`.
    ///
    /// Headers of all files are validated before any extraction begins. `on_file` is
    /// called before each file with its 1-based position.
    pub fn run(
        &self,
        files: &[PathBuf],
        out_dir: &Path,
        pool: &ThreadPool,
        mut on_file: impl FnMut(usize, usize, &Path),
    ) -> Result<Vec<ExtractedFile>> {
        self.reader
            .validate(files)
            .context("Source schema check failed")?;
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        let mut outputs = Vec::with_capacity(files.len());
        for (i, source) in files.iter().enumerate() {
            on_file(i + 1, files.len(), source);
            info!(file = %source.display(), "processing file {}/{}", i + 1, files.len());

            let records = self
                .reader
                .read(source)
                .with_context(|| format!("Failed to read {}", source.display()))?;

            let resolver = self.file_extract_dir.as_ref().map(|dir| {
                let resolver = FileResolver::new(dir);
                if files.len() > 1 {
                    resolver.with_subdir(file_stem(source))
                } else {
                    resolver
                }
            });

            let total = records.len();
            let rows: Vec<Vec<String>> = pool.install(|| {
                records
                    .par_iter()
                    .filter_map(|record| self.process_record(record, resolver.as_ref()))
                    .collect()
            });
            if rows.is_empty() {
                warn!(file = %source.display(), records = total, "no record matched a keyword");
            }

            let mut table = Table::new(self.output_headers());
            let kept = rows.len();
            for row in rows {
                table.push_row(row);
            }
            let output = out_dir.join(format!("{}.csv", file_stem(source)));
            table.write(&output)?;
            info!(file = %source.display(), records = total, kept, "extracted");

            outputs.push(ExtractedFile {
                source: source.clone(),
                output,
                rows: kept,
            });
        }
        Ok(outputs)
    }
}
