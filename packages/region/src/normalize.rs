//! Region name normalization.
//!
//! Provides a deterministic normalization pipeline applied symmetrically
//! to boundary names and attribute records. This ensures that
//! `"Sana'a Governorate"` and `"San'a'"` produce the same region key.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization as _;
use unicode_normalization::char::is_combining_mark;

use crate::aliases::default_aliases;

/// Apostrophe and ayn/hamza transliteration marks. These are deleted
/// rather than replaced so that `"Sana'a"` becomes `"sanaa"`.
static APOSTROPHE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"['’‘`´ʼʻʿʾ]+").expect("valid regex"));

/// Everything that is not a letter, digit or whitespace.
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid regex"));

/// Administrative suffix words that carry no identifying information.
const SUFFIX_WORDS: &[&str] = &["governorate", "governorates"];

/// Normalizes a raw region name using the built-in alias table.
///
/// The pipeline:
/// 1. Lowercase
/// 2. Strip diacritics (NFD decomposition, combining marks dropped)
/// 3. Delete apostrophe variants
/// 4. Replace hyphens, underscores and other punctuation with spaces
/// 5. Drop the word "governorate" (and its plural/possessive forms)
/// 6. Collapse whitespace and trim
/// 7. Resolve through the alias table
#[must_use]
pub fn normalize(raw: &str) -> String {
    default_aliases().normalize(raw)
}

/// Normalizes a JSON value holding a region name.
///
/// Anything other than a JSON string normalizes to an empty key.
#[must_use]
pub fn normalize_value(value: &serde_json::Value) -> String {
    value.as_str().map(normalize).unwrap_or_default()
}

/// Steps 1-6 of the pipeline: everything except the alias lookup.
#[must_use]
pub fn canonical_form(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let stripped: String = lower.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let no_apostrophes = APOSTROPHE_RE.replace_all(&stripped, "");
    let spaced = PUNCTUATION_RE.replace_all(&no_apostrophes, " ");

    spaced
        .split_whitespace()
        .filter(|token| !SUFFIX_WORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}
