use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between chunks inside a row's context string.
pub const CHUNK_DELIMITER: char = '|';

/// Unit used to build chunk windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Windows of `N` whitespace-separated tokens either side of the keyword.
    #[default]
    Word,
    /// Windows of `N` sentences either side of the keyword.
    Sentence,
}

impl fmt::Display for ChunkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word => write!(f, "word"),
            Self::Sentence => write!(f, "sentence"),
        }
    }
}

impl FromStr for ChunkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "word" => Ok(Self::Word),
            "sentence" => Ok(Self::Sentence),
            other => Err(format!("unknown chunk mode '{other}' (expected word or sentence)")),
        }
    }
}

/// A bounded window of cleaned, lower-cased text around one keyword occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    text: String,
    center: usize,
    start: usize,
    end: usize,
}

impl Chunk {
    /// Creates a chunk covering units `start..end` centred on unit `center`.
    pub fn new(text: impl Into<String>, center: usize, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            center,
            start,
            end,
        }
    }

    /// The window text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Index of the token or sentence that contained the keyword.
    pub fn center(&self) -> usize {
        self.center
    }

    /// Half-open unit range covered by this chunk.
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Number of tokens or sentences in the window.
    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

/// Joins chunk texts into a single pipe-delimited context string.
pub fn join_chunks(chunks: &[Chunk]) -> String {
    let texts: Vec<&str> = chunks.iter().map(Chunk::text).collect();
    texts.join(&CHUNK_DELIMITER.to_string())
}

/// Splits a context string back into its non-empty chunks.
///
/// # Examples
///
/// ```
/// use craml::models::split_context;
///
/// let chunks: Vec<&str> = split_context("a fraud case||waste report").collect();
/// assert_eq!(chunks, vec!["a fraud case", "waste report"]);
/// ```
pub fn split_context(context: &str) -> impl Iterator<Item = &str> {
    context
        .split(CHUNK_DELIMITER)
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_mode_parses_case_insensitively() {
        assert_eq!("Word".parse::<ChunkMode>().unwrap(), ChunkMode::Word);
        assert_eq!(" SENTENCE ".parse::<ChunkMode>().unwrap(), ChunkMode::Sentence);
        assert!("paragraph".parse::<ChunkMode>().is_err());
    }

    #[test]
    fn chunk_mode_serializes_lowercase() {
        let json = serde_json::to_string(&ChunkMode::Sentence).unwrap();
        assert_eq!(json, r#""sentence""#);
    }

    #[test]
    fn join_chunks_uses_pipe() {
        let chunks = vec![Chunk::new("one two", 0, 0, 2), Chunk::new("three", 4, 4, 5)];
        assert_eq!(join_chunks(&chunks), "one two|three");
        assert_eq!(chunks[0].width(), 2);
    }
}
