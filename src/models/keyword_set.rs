use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Analyst-defined keywords, grouped by tag.
///
/// Serialized as a plain JSON object `{"tag": ["keyword", ...]}`, which is the format of a
/// project's `keywords.json`. Keywords are normalised to trimmed lowercase on insert and
/// kept in first-seen order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>", into = "BTreeMap<String, Vec<String>>")]
pub struct KeywordSet {
    tags: BTreeMap<String, Vec<String>>,
}

impl KeywordSet {
    /// Creates an empty keyword set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a keyword file.
    ///
    /// A missing file yields an empty set, matching a freshly created project.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read keyword file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse keyword file: {}", path.display()))
    }

    /// Writes the keyword set as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write keyword file: {}", path.display()))
    }

    /// Adds keywords under a tag.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::KeywordSet;
    ///
    /// let mut keywords = KeywordSet::new();
    /// keywords.insert("fraud", ["Fraud ", "scam", "fraud", ""]);
    /// assert_eq!(keywords.keywords_for("fraud"), &["fraud", "scam"]);
    /// ```
    pub fn insert<I, S>(&mut self, tag: impl Into<String>, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.tags.entry(tag.into()).or_default();
        for keyword in keywords {
            let normalized = keyword.as_ref().trim().to_lowercase();
            if !normalized.is_empty() && !entry.contains(&normalized) {
                entry.push(normalized);
            }
        }
    }

    /// Returns the keywords registered for a tag (empty if the tag is unknown).
    pub fn keywords_for(&self, tag: &str) -> &[String] {
        self.tags.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the tag names in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    /// Returns every keyword across all tags, de-duplicated.
    pub fn all_keywords(&self) -> Vec<String> {
        let mut all: Vec<String> = Vec::new();
        for keywords in self.tags.values() {
            for keyword in keywords {
                if !all.contains(keyword) {
                    all.push(keyword.clone());
                }
            }
        }
        all
    }

    /// Returns a copy restricted to the given tags.
    pub fn restricted_to<S: AsRef<str>>(&self, tags: &[S]) -> Self {
        let tags = self
            .tags
            .iter()
            .filter(|(name, _)| tags.iter().any(|t| t.as_ref() == name.as_str()))
            .map(|(name, keywords)| (name.clone(), keywords.clone()))
            .collect();
        Self { tags }
    }

    /// Returns `true` if no tag has any keyword.
    pub fn is_empty(&self) -> bool {
        self.tags.values().all(Vec::is_empty)
    }
}

impl From<BTreeMap<String, Vec<String>>> for KeywordSet {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        let mut set = Self::new();
        for (tag, keywords) in raw {
            set.insert(tag, keywords);
        }
        set
    }
}

impl From<KeywordSet> for BTreeMap<String, Vec<String>> {
    fn from(set: KeywordSet) -> Self {
        set.tags
    }
}
