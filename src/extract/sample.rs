use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use super::window::split_units;
use crate::dataset::{TEXT_COLUMN, Table};
use crate::models::{ChunkMode, split_context};

/// How to pick chunks from the counted pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// The most frequent chunks.
    Top,
    /// A uniform random selection.
    Random,
}

impl FromStr for SampleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TOP" => Ok(Self::Top),
            "RANDOM" => Ok(Self::Random),
            other => Err(format!("unknown sample mode '{other}' (expected TOP or RANDOM)")),
        }
    }
}

impl fmt::Display for SampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => write!(f, "TOP"),
            Self::Random => write!(f, "RANDOM"),
        }
    }
}

/// A distinct chunk and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkCount {
    pub chunk: String,
    pub count: usize,
}

/// Parameters for drawing example chunks out of an extraction run.
#[derive(Debug, Clone)]
pub struct ChunkSampler {
    pub keywords: Vec<String>,
    /// Units kept either side of each chunk's midpoint.
    pub window: usize,
    pub mode: ChunkMode,
    pub sample: SampleMode,
    pub size: usize,
    pub seed: u64,
}

/// Trims a stored chunk to `n` units either side of its middle unit.
pub fn recentre(chunk: &str, n: usize, mode: ChunkMode) -> String {
    let units = match mode {
        ChunkMode::Word => chunk.split_whitespace().map(str::to_string).collect(),
        ChunkMode::Sentence => split_units(chunk, mode),
    };
    let middle = units.len() / 2;
    let start = middle.saturating_sub(n);
    let end = (middle + n + 1).min(units.len());
    units[start..end].join(" ")
}

impl ChunkSampler {
    /// Counts every re-centred keyword chunk in one extracted file.
    pub fn count_file(&self, path: &Path) -> Result<HashMap<String, usize>> {
        let table = Table::read(path)?;
        let text = table
            .require_column(TEXT_COLUMN)
            .with_context(|| format!("Not an extraction file: {}", path.display()))?;

        let mut counts = HashMap::new();
        for row in table.rows() {
            for chunk in split_context(&row[text]) {
                if !self.keywords.iter().any(|k| chunk.contains(k.as_str())) {
                    continue;
                }
                let trimmed = recentre(chunk, self.window, self.mode);
                if !trimmed.is_empty() {
                    *counts.entry(trimmed).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Counts chunks across all files on the pool and draws the sample.
    ///
    /// Results are ordered by count (descending), then text.
    pub fn sample(&self, files: &[PathBuf], pool: &rayon::ThreadPool) -> Result<Vec<ChunkCount>> {
        info!(files = files.len(), mode = %self.sample, size = self.size, "sampling chunks");
        let per_file: Vec<HashMap<String, usize>> = pool.install(|| {
            files
                .par_iter()
                .map(|f| self.count_file(f))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut totals: HashMap<String, usize> = HashMap::new();
        for counts in per_file {
            for (chunk, count) in counts {
                *totals.entry(chunk).or_insert(0) += count;
            }
        }

        let mut all: Vec<ChunkCount> = totals
            .into_iter()
            .map(|(chunk, count)| ChunkCount { chunk, count })
            .collect();
        sort_by_count(&mut all);

        let mut picked = match self.sample {
            SampleMode::Top => {
                all.truncate(self.size);
                all
            }
            SampleMode::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                all.choose_multiple(&mut rng, self.size).cloned().collect()
            }
        };
        sort_by_count(&mut picked);
        Ok(picked)
    }
}

fn sort_by_count(chunks: &mut [ChunkCount]) {
    chunks.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.chunk.cmp(&b.chunk)));
}

/// Collects the `.csv` files directly inside an extraction directory, sorted.
pub fn extraction_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "csv"))
        .collect();
    files.sort();
    Ok(files)
}
