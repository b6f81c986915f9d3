use once_cell::sync::Lazy;
use regex::Regex;

use super::numbers::spell_out_numbers;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("valid regex"));
static RE_URLS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:https?://|www)\S+").expect("valid regex"));
// Every isolated letter except "a" and "i"
static RE_SINGLE_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[b-hj-zB-HJ-Z]\b").expect("valid regex"));
static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Cleans raw record text before windowing.
///
/// Decodes HTML entities, strips markup and URLs, drops stray single letters, removes
/// digits (or spells them out when `keep_numbers` is set), normalises punctuation and
/// drops every non-ASCII character. The result is not lower-cased.
///
/// # Examples
///
/// ```
/// use craml::extract::clean_text;
///
/// let cleaned = clean_text("<p>Fraud &amp; waste: see www.example.com x 42</p>", false);
/// assert_eq!(cleaned, "Fraud & waste. see");
///
/// let cleaned = clean_text("Lost $5.25 in 1999", true);
/// assert_eq!(cleaned, "Lost five dollars twenty five cents in nineteen ninety nine");
/// ```
pub fn clean_text(raw: &str, keep_numbers: bool) -> String {
    let mut text = if raw.contains('&') {
        html_escape::decode_html_entities(raw.trim()).into_owned()
    } else {
        raw.to_string()
    };
    if text.contains('<') {
        text = RE_TAGS.replace_all(&text, " ").into_owned();
    }
    text = RE_URLS.replace_all(&text, " ").into_owned();
    text = RE_SINGLE_LETTER.replace_all(&text, " ").into_owned();
    text = if keep_numbers {
        spell_out_numbers(&text)
    } else {
        RE_DIGITS.replace_all(&text, " ").into_owned()
    };

    let mut text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    text = text
        .replace(',', "")
        .replace([':', '*'], ".")
        .replace(" .", ".");
    text.retain(|c| c.is_ascii());
    text.replace(" s ", " ").trim().to_string()
}
