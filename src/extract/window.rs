use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Chunk, ChunkMode};

static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
static RE_NON_SENTENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9.!?]+").expect("valid regex"));

/// Splits cleaned, lower-cased text into window units.
pub fn split_units(text: &str, mode: ChunkMode) -> Vec<String> {
    match mode {
        ChunkMode::Word => RE_NON_WORD
            .replace_all(text, " ")
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        ChunkMode::Sentence => RE_NON_SENTENCE
            .replace_all(text, " ")
            .replace(['?', '!'], ".")
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// A keyword reduced to the characters that survive unit splitting.
enum Needle {
    /// Matched as a substring of one unit.
    Single(String),
    /// Word mode only: a multi-word keyword spanning consecutive tokens.
    Phrase(Vec<String>),
}

impl Needle {
    fn new(keyword: &str, mode: ChunkMode) -> Option<Self> {
        let keyword = keyword.trim().to_lowercase();
        let needle = match mode {
            ChunkMode::Word => {
                let parts: Vec<String> = RE_NON_WORD
                    .replace_all(&keyword, " ")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                match parts.len() {
                    0 => return None,
                    1 => Self::Single(parts.into_iter().next().unwrap_or_default()),
                    _ => Self::Phrase(parts),
                }
            }
            ChunkMode::Sentence => {
                let squashed = RE_NON_SENTENCE
                    .replace_all(&keyword, " ")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                if squashed.is_empty() {
                    return None;
                }
                Self::Single(squashed)
            }
        };
        Some(needle)
    }

    fn found_at(&self, units: &[String], i: usize) -> bool {
        match self {
            Self::Single(needle) => units[i].contains(needle.as_str()),
            Self::Phrase(parts) => {
                let last = parts.len() - 1;
                if i + last >= units.len() {
                    return false;
                }
                units[i].ends_with(parts[0].as_str())
                    && (1..last).all(|k| units[i + k] == parts[k])
                    && units[i + last].starts_with(parts[last].as_str())
            }
        }
    }
}

/// Emits one window per unit that contains a keyword.
///
/// Each window spans `[max(0, i - n), min(len, i + n + 1))` around the located unit `i`,
/// so it never holds more than `2n + 1` units.
///
/// # Examples
///
/// ```
/// use craml::extract::context_windows;
/// use craml::models::ChunkMode;
///
/// let keywords = vec!["fraud".to_string()];
/// let chunks = context_windows("one two fraudulent three four five", &keywords, 1, ChunkMode::Word);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text(), "two fraudulent three");
/// ```
pub fn context_windows(text: &str, keywords: &[String], n: usize, mode: ChunkMode) -> Vec<Chunk> {
    let units = split_units(text, mode);
    let needles: Vec<Needle> = keywords.iter().filter_map(|k| Needle::new(k, mode)).collect();

    (0..units.len())
        .filter(|&i| needles.iter().any(|needle| needle.found_at(&units, i)))
        .map(|i| {
            let start = i.saturating_sub(n);
            let end = (i + n + 1).min(units.len());
            Chunk::new(units[start..end].join(" "), i, start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn windows_clip_at_boundaries() {
        let chunks = context_windows("fraud a b c d e waste", &kw(&["fraud", "waste"]), 2, ChunkMode::Word);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text(), "fraud a b");
        assert_eq!(chunks[0].span(), (0, 3));
        assert_eq!(chunks[1].text(), "d e waste");
    }

    #[test]
    fn window_is_symmetric_and_bounded() {
        let text = (0..50).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = context_windows(&format!("{text} fraud {text}"), &kw(&["fraud"]), 3, ChunkMode::Word);

        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.width(), 7);
        let (start, end) = chunk.span();
        assert_eq!(chunk.center() - start, end - 1 - chunk.center());
    }

    #[test]
    fn word_mode_splits_on_punctuation() {
        let units = split_units("fraud, waste-abuse.", ChunkMode::Word);
        assert_eq!(units, vec!["fraud", "waste", "abuse"]);
    }

    #[test]
    fn sentence_mode_normalises_terminators() {
        let units = split_units("first one! second? third.. fourth", ChunkMode::Sentence);
        assert_eq!(units, vec!["first one", "second", "third", "fourth"]);

        let chunks = context_windows(
            "a. b. fraud here. c. d",
            &kw(&["fraud"]),
            1,
            ChunkMode::Sentence,
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "b fraud here c");
    }

    #[test]
    fn multi_word_keyword_in_word_mode() {
        let chunks = context_windows("x the cost overrun was y", &kw(&["cost overrun"]), 1, ChunkMode::Word);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "the cost overrun");
    }

    #[test]
    fn every_occurrence_gets_a_window() {
        let chunks = context_windows("fraud fraud", &kw(&["fraud"]), 0, ChunkMode::Word);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn no_keyword_no_windows() {
        assert!(context_windows("nothing to see", &kw(&["fraud"]), 5, ChunkMode::Word).is_empty());
        assert!(context_windows("", &kw(&["fraud"]), 5, ChunkMode::Sentence).is_empty());
    }
}
