//! Text normalization for searching and sorting

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a string for searches
///
/// NFKD form is used: characters are decomposed and replaced by their
/// compatibility equivalents (e.g. '⁹' becomes '9'). Combining marks are then
/// dropped, which de-accents the text, and the result is lowercased.
/// Punctuation is preserved. Visually-similar letters from different alphabets
/// (Latin 'o', Greek 'ο') remain distinct.
pub fn normalize(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Split already-normalized text into keyword tokens
///
/// Tokens are runs of letters and digits; everything else separates them.
pub fn keywords(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}
