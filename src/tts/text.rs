//! Text preprocessing and sentence splitting.
//!
//! Abbreviations and decimal points are masked with sentinel characters
//! before the split so `Mr. Smith` and `3.14` survive intact, then restored.

use lazy_static::lazy_static;
use regex::Regex;

// Sentinels occupy control-plane code points the preprocessor already strips
// from the input.
const ABBREV_MASK: char = '\u{1}';
const DECIMAL_MASK: char = '\u{2}';

lazy_static! {
    static ref ABBREVIATION_RE: Regex = Regex::new(
        r"\b(?i:mr|mrs|ms|dr|prof|sr|jr|st|sgt|capt|lt|col|gen|rev|etc|vs|approx|dept|fig|inc|ltd)\."
    )
    .unwrap();
    static ref DECIMAL_RE: Regex = Regex::new(r"(\d)\.(\d)").unwrap();
    static ref SPACE_RUN_RE: Regex = Regex::new(r"[ \t]+").unwrap();
}

/// Normalizes whitespace and strips non-printable control characters, keeping
/// `\n`, `\r`, `\t`. CRLF collapses to LF and `(e.g., ` loses the comma that
/// would otherwise split mid-parenthesis.
pub fn preprocess(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    let text = text.replace("(e.g., ", "(e.g. ");
    SPACE_RUN_RE.replace_all(&text, " ").trim().to_string()
}

fn mask(text: &str) -> String {
    let masked = ABBREVIATION_RE.replace_all(text, |caps: &regex::Captures| {
        caps[0].replace('.', &ABBREV_MASK.to_string())
    });
    DECIMAL_RE
        .replace_all(&masked, format!("${{1}}{}${{2}}", DECIMAL_MASK).as_str())
        .into_owned()
}

fn unmask(text: &str) -> String {
    text.replace(ABBREV_MASK, ".").replace(DECIMAL_MASK, ".")
}

/// Splits on `[.!?]` followed by whitespace and a non-boundary character.
/// Runs of closing punctuation stay attached to their sentence; empty
/// sentences are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let masked = mask(text);
    let chars: Vec<char> = masked.chars().collect();
    let mut sentences: Vec<String> = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let crossed_whitespace = j > i + 1;
            let next_is_boundary = j < chars.len() && matches!(chars[j], '.' | '!' | '?');
            if crossed_whitespace && j < chars.len() && !next_is_boundary {
                sentences.push(chars[start..=i].iter().collect());
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    if start < chars.len() {
        sentences.push(chars[start..].iter().collect());
    }

    sentences
        .into_iter()
        .map(|s| unmask(s.trim()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// The full pipeline: preprocess, then split.
pub fn sentences_of(raw: &str) -> Vec<String> {
    split_sentences(&preprocess(raw))
}
