use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

/// Marker that flags a rule cell as a regular expression.
pub const REGEX_MARKER: &str = "REGEX";

/// Separator between the regex marker and the pattern, e.g. `REGEX:::\bfraud\w*`.
pub const REGEX_SEPARATOR: &str = ":::";

/// Errors raised while loading a rule file.
#[derive(Error, Debug)]
pub enum RuleFileError {
    /// The file could not be opened or read.
    #[error("failed to read rule file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid delimited text.
    #[error("malformed rule file: {0}")]
    Csv(#[from] csv::Error),

    /// The header does not start with `rule,prio` followed by at least one tag.
    #[error("rule file header must be 'rule,prio,<tag>,...' but was '{0}'")]
    Header(String),

    /// A priority cell is not an integer.
    #[error("line {line}: priority '{value}' is not an integer")]
    Priority { line: usize, value: String },

    /// A tag cell is not 0 or 1.
    #[error("line {line}: encoding '{value}' for tag '{tag}' must be 0 or 1")]
    Encoding {
        line: usize,
        tag: String,
        value: String,
    },

    /// A regex rule does not compile.
    #[error("line {line}: invalid regex '{pattern}'")]
    Regex {
        line: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Fixed-schema tag assertion of one rule: one boolean per tag column of its rule file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagEncoding(Vec<bool>);

impl TagEncoding {
    pub fn new(values: Vec<bool>) -> Self {
        Self(values)
    }

    /// An all-zero encoding over `width` tags, used for negative examples.
    pub fn zeros(width: usize) -> Self {
        Self(vec![false; width])
    }

    pub fn get(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn values(&self) -> &[bool] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of asserted tags.
    pub fn count_ones(&self) -> usize {
        self.0.iter().filter(|v| **v).count()
    }
}

/// What a rule tests each chunk for.
#[derive(Debug, Clone)]
pub enum RulePattern {
    /// Lower-cased substring containment.
    Literal(String),
    /// Regular expression search.
    Regex(Regex),
}

impl RulePattern {
    /// Parses a rule cell.
    ///
    /// Cells containing `REGEX` are regexes whose pattern follows the first `:::`; every
    /// other cell is a literal, trimmed and lower-cased to match cleaned chunk text.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::models::RulePattern;
    ///
    /// let literal = RulePattern::parse("  Fraud ").unwrap();
    /// assert!(literal.is_match("a fraud case"));
    ///
    /// let regex = RulePattern::parse(r"REGEX:::fraud\w+").unwrap();
    /// assert!(regex.is_match("fraudulent claims"));
    /// assert!(!regex.is_match("fraud"));
    /// ```
    pub fn parse(cell: &str) -> Result<Self, regex::Error> {
        if cell.contains(REGEX_MARKER) {
            let pattern = cell.split(REGEX_SEPARATOR).nth(1).unwrap_or_default().trim();
            Ok(Self::Regex(Regex::new(pattern)?))
        } else {
            Ok(Self::Literal(cell.trim().to_lowercase()))
        }
    }

    pub fn is_match(&self, chunk: &str) -> bool {
        match self {
            Self::Literal(literal) => !literal.is_empty() && chunk.contains(literal.as_str()),
            Self::Regex(regex) => regex.is_match(chunk),
        }
    }

    /// The literal text or the regex source.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(literal) => literal,
            Self::Regex(regex) => regex.as_str(),
        }
    }
}

/// One row of a rule file.
#[derive(Debug, Clone)]
pub struct Rule {
    /// The cell exactly as written by the analyst.
    pub raw: String,
    pub pattern: RulePattern,
    /// Higher wins.
    pub priority: i64,
    pub encoding: TagEncoding,
}

/// The winning match of a rule file against a row's chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Position of the rule in file order.
    pub rule_index: usize,
    /// Position of the matched chunk in the row's context string.
    pub chunk_index: usize,
    pub priority: i64,
}

/// An ordered collection of rules sharing one tag schema.
#[derive(Debug, Clone)]
pub struct RuleFile {
    /// File stem, used to name training outputs.
    pub name: String,
    pub tags: Vec<String>,
    pub rules: Vec<Rule>,
}

impl RuleFile {
    /// Creates a rule file from already-built rules.
    pub fn new(name: impl Into<String>, tags: Vec<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            tags,
            rules,
        }
    }

    /// Loads a rule file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleFileError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| RuleFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_reader(name, file)
    }

    /// Parses a rule file from any reader.
    ///
    /// Blank rule cells are skipped. A blank encoding cell counts as 0.
    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self, RuleFileError> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let header: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if header.len() < 3 || header[0] != "rule" || header[1] != "prio" {
            return Err(RuleFileError::Header(header.join(",")));
        }
        let tags: Vec<String> = header[2..].to_vec();

        let mut rules = Vec::new();
        for (offset, row) in csv_reader.records().enumerate() {
            let row = row?;
            // Line 1 is the header
            let line = offset + 2;
            let raw = row.get(0).unwrap_or_default();
            if raw.trim().is_empty() {
                continue;
            }

            let priority = parse_priority(row.get(1).unwrap_or_default()).ok_or_else(|| {
                RuleFileError::Priority {
                    line,
                    value: row.get(1).unwrap_or_default().to_string(),
                }
            })?;

            let mut encoding = Vec::with_capacity(tags.len());
            for (i, tag) in tags.iter().enumerate() {
                let cell = row.get(i + 2).unwrap_or_default();
                let value = parse_flag(cell).ok_or_else(|| RuleFileError::Encoding {
                    line,
                    tag: tag.clone(),
                    value: cell.to_string(),
                })?;
                encoding.push(value);
            }

            let pattern = RulePattern::parse(raw).map_err(|source| RuleFileError::Regex {
                line,
                pattern: raw.to_string(),
                source,
            })?;

            rules.push(Rule {
                raw: raw.to_string(),
                pattern,
                priority,
                encoding: TagEncoding::new(encoding),
            });
        }

        Ok(Self::new(name, tags, rules))
    }

    /// Returns the column offset of a tag.
    pub fn tag_index(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|t| t == tag)
    }

    /// Resolves all (rule, chunk) matches of a row to a single winner.
    ///
    /// The highest priority wins. Among equal priorities the rule earlier in the file wins,
    /// and for that rule its first matching chunk is reported.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::models::RuleFile;
    ///
    /// let csv = "rule,prio,tagA,tagB\nfraud,1,1,0\nwaste,2,0,1\n";
    /// let rules = RuleFile::from_reader("demo", csv.as_bytes()).unwrap();
    ///
    /// let winner = rules.best_match(&["fraud and waste"]).unwrap();
    /// assert_eq!(winner.rule_index, 1);
    /// assert_eq!(rules.rules[winner.rule_index].encoding.values(), &[false, true]);
    /// ```
    pub fn best_match<S: AsRef<str>>(&self, chunks: &[S]) -> Option<RuleMatch> {
        let mut best: Option<RuleMatch> = None;
        for (rule_index, rule) in self.rules.iter().enumerate() {
            if best.as_ref().is_some_and(|b| b.priority >= rule.priority) {
                continue;
            }
            if let Some(chunk_index) = chunks
                .iter()
                .position(|chunk| rule.pattern.is_match(chunk.as_ref()))
            {
                best = Some(RuleMatch {
                    rule_index,
                    chunk_index,
                    priority: rule.priority,
                });
            }
        }
        best
    }

    /// Returns `true` if any rule matches the chunk.
    pub fn any_match(&self, chunk: &str) -> bool {
        self.rules.iter().any(|rule| rule.pattern.is_match(chunk))
    }
}

/// Accepts integers and integral floats such as `2.0`, which spreadsheet exports produce.
fn parse_priority(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    if let Ok(value) = cell.parse::<i64>() {
        return Some(value);
    }
    let value = cell.parse::<f64>().ok()?;
    (value.fract() == 0.0 && value.is_finite()).then_some(value as i64)
}

fn parse_flag(cell: &str) -> Option<bool> {
    match cell.trim() {
        "" | "0" | "0.0" => Some(false),
        "1" | "1.0" => Some(true),
        _ => None,
    }
}
