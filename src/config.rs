//! Project layout and on-disk configuration.
//!
//! A project directory holds everything one analyst works with:
//!
//! ```text
//! <project>/
//!   settings.json     source definitions
//!   keywords.json     tag -> keywords
//!   rules/*.csv       rule files
//!   csv/<run>/        extraction and extrapolation output
//!   train/<run>/      training corpora, with trained models under clf/
//!   db/               destination databases
//!   logs/             run ledgers
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::db::ColumnSpec;
use crate::models::{ChunkMode, KeywordSet, RunId, RunKind};
use crate::source::{SourceError, SourceFormat, SourceReader, SourceSchema};
use crate::utils::default_project_dir;

/// Environment variable naming the project directory.
pub const PROJECT_ENV: &str = "CRAML_PROJECT";

/// Paths of one project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Picks the project directory: explicit path, then `CRAML_PROJECT`, then the
    /// platform default.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        match std::env::var(PROJECT_ENV) {
            Ok(path) if !path.trim().is_empty() => Ok(Self::new(path)),
            _ => Ok(Self::new(default_project_dir()?)),
        }
    }

    /// Creates the fixed sub-directories if they do not exist.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.rules_dir(),
            self.root.join("csv"),
            self.root.join("train"),
            self.db_dir(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn keywords_path(&self) -> PathBuf {
        self.root.join("keywords.json")
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.root.join("rules")
    }

    /// Output directory of an extraction or extrapolation run.
    pub fn csv_dir(&self, run: &RunId) -> PathBuf {
        self.root.join("csv").join(run.as_str())
    }

    /// Output directory of a training-set run.
    pub fn train_dir(&self, run: &RunId) -> PathBuf {
        self.root.join("train").join(run.as_str())
    }

    /// Model directory of a training-set run.
    pub fn clf_dir(&self, run: &RunId) -> PathBuf {
        self.train_dir(run).join("clf")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ledger_path(&self, kind: RunKind) -> PathBuf {
        self.logs_dir().join(kind.ledger_file())
    }

    pub fn load_settings(&self) -> Result<Settings> {
        Settings::load(self.settings_path())
    }

    pub fn load_keywords(&self) -> Result<KeywordSet> {
        KeywordSet::load(self.keywords_path())
    }

    /// Lists the rule files under `rules/`, sorted by name.
    pub fn rule_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.rules_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to list rules: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "csv"))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Treats the literal string `"None"` (and blanks) as an absent value.
fn none_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty() && v != "None"))
}

/// One source as configured in `settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub files: Vec<PathBuf>,
    pub ext: String,
    #[serde(default)]
    pub delim: String,
    pub fields: Vec<String>,
    pub id: String,
    /// Text field; `"None"` marks a metadata-only source.
    #[serde(default, deserialize_with = "none_string")]
    pub extract: Option<String>,
    /// The extract field holds file names rather than text.
    #[serde(default)]
    pub file_extract: bool,
    #[serde(default)]
    pub file_extract_dir: Option<PathBuf>,
}

impl SourceSettings {
    pub fn schema(&self) -> SourceSchema {
        SourceSchema::new(self.fields.clone(), self.id.clone(), self.extract.clone())
    }

    pub fn reader(&self) -> Result<SourceReader, SourceError> {
        let format = SourceFormat::from_settings(&self.ext, &self.delim)?;
        Ok(SourceReader::new(format, self.schema()))
    }
}

/// Contents of `settings.json`: source name → settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    pub sources: BTreeMap<String, SourceSettings>,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))
    }

    /// The source that carries text to extract.
    pub fn extraction(&self) -> Option<(&str, &SourceSettings)> {
        self.sources
            .iter()
            .find(|(_, s)| s.extract.is_some())
            .map(|(name, s)| (name.as_str(), s))
    }

    /// The optional metadata-only source.
    pub fn metadata(&self) -> Option<(&str, &SourceSettings)> {
        self.sources
            .iter()
            .find(|(_, s)| s.extract.is_none())
            .map(|(name, s)| (name.as_str(), s))
    }
}

/// Where a pipeline run stores its merged rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Destination {
    /// A SQLite table, de-duplicated against existing rows by identifier.
    Table {
        database: PathBuf,
        table: String,
        /// Metadata columns with their SQL types; tag columns are added automatically.
        columns: Vec<ColumnSpec>,
    },
    /// A flat CSV file, de-duplicated only within the run.
    File { path: PathBuf },
}

fn default_window() -> usize {
    6
}

/// A pipeline job as stored in a JSON job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// Tags to classify, in order.
    pub tags: Vec<String>,
    /// Trained model per tag.
    pub classifiers: BTreeMap<String, PathBuf>,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default)]
    pub mode: ChunkMode,
    #[serde(default)]
    pub keep_text: bool,
    /// Spell numbers out during extraction instead of dropping them.
    #[serde(default)]
    pub keep_numbers: bool,
    pub destination: Destination,
    /// Extraction files; defaults to the extraction source's configured files.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pipeline config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Every tag needs a classifier.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        if let Some(tag) = self.tags.iter().find(|t| !seen.insert(t.to_lowercase())) {
            anyhow::bail!("Duplicate tag '{tag}' in pipeline {}", self.name);
        }

        let missing: Vec<&str> = self
            .tags
            .iter()
            .filter(|t| !self.classifiers.contains_key(*t))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("No classifier configured for tags: {}", missing.join(", "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    const SETTINGS: &str = r#"{
        "main": {"files": ["meta.csv"], "ext": "csv", "delim": ",", "fields": ["id", "date"], "id": "id", "extract": "None"},
        "text": {"files": ["a.xml"], "ext": "xml", "fields": ["id", "body"], "id": "id", "extract": "body"}
    }"#;

    #[test]
    fn settings_split_extraction_and_metadata() {
        let settings: Settings = serde_json::from_str(SETTINGS).unwrap();

        let (name, extraction) = settings.extraction().unwrap();
        assert_eq!(name, "text");
        assert_eq!(extraction.extract.as_deref(), Some("body"));
        assert!(!extraction.file_extract);

        let (name, metadata) = settings.metadata().unwrap();
        assert_eq!(name, "main");
        assert_eq!(metadata.extract, None);
    }

    #[test]
    fn reader_uses_configured_format() {
        let settings: Settings = serde_json::from_str(SETTINGS).unwrap();
        let reader = settings.sources["text"].reader().unwrap();
        assert_eq!(reader.format(), SourceFormat::Xml);
        assert_eq!(reader.schema().extract.as_deref(), Some("body"));
    }

    #[test]
    fn project_paths_follow_layout() {
        let project = Project::new("/p");
        let run = RunId::new("r1");

        assert_eq!(project.csv_dir(&run), PathBuf::from("/p/csv/r1"));
        assert_eq!(project.clf_dir(&run), PathBuf::from("/p/train/r1/clf"));
        assert_eq!(
            project.ledger_path(RunKind::Pipeline),
            PathBuf::from("/p/logs/pipe_procs.json")
        );
    }

    #[test]
    #[serial]
    fn resolve_prefers_explicit_then_env() {
        let explicit = Project::resolve(Some(Path::new("/explicit"))).unwrap();
        assert_eq!(explicit.root(), Path::new("/explicit"));

        // SAFETY: serialized with the other environment-mutating tests
        unsafe { std::env::set_var(PROJECT_ENV, "/from-env") };
        let from_env = Project::resolve(None).unwrap();
        unsafe { std::env::remove_var(PROJECT_ENV) };

        assert_eq!(from_env.root(), Path::new("/from-env"));
    }

    #[test]
    fn rule_files_are_sorted_csvs() {
        let dir = tempdir().unwrap();
        let project = Project::new(dir.path());
        project.ensure_layout().unwrap();
        fs::write(project.rules_dir().join("b.csv"), "").unwrap();
        fs::write(project.rules_dir().join("a.csv"), "").unwrap();
        fs::write(project.rules_dir().join("notes.txt"), "").unwrap();

        let files = project.rule_files().unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn pipeline_config_requires_classifier_per_tag() {
        let json = r#"{
            "name": "nightly",
            "tags": ["fraud", "waste"],
            "classifiers": {"fraud": "clf/NB_0.5-fraud.json"},
            "destination": {"kind": "file", "path": "out.csv"}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.window, 6);
        assert_eq!(config.mode, ChunkMode::Word);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("waste"));
    }

    #[test]
    fn pipeline_config_rejects_repeated_tags() {
        let json = r#"{
            "name": "nightly",
            "tags": ["fraud", "Fraud"],
            "classifiers": {"fraud": "clf/a.json", "Fraud": "clf/b.json"},
            "destination": {"kind": "file", "path": "out.csv"}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate tag 'Fraud'"));
    }
}
