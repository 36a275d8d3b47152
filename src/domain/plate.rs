//! License plate identifiers
//!
//! OCR output is noisy: stray punctuation, mixed case, trailing newlines from
//! the recognizer. `normalize` maps any raw string onto a comparable
//! identifier. The mapping is total and idempotent.

use serde::Serialize;

/// Maximum length of a normalized plate identifier
pub const MAX_PLATE_LEN: usize = 10;

/// Canonical plate identifier: uppercase ASCII alphanumerics, at most 10 chars.
///
/// May be empty. An empty plate means "no reading" and is never a vote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct NormalizedPlate(String);

impl NormalizedPlate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase form used by the booking ledger for `plate_no`
    pub fn ledger_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Two letters, two digits, two letters, four digits (e.g. `MH12AB1234`)
    pub fn matches_strict_format(&self) -> bool {
        let b = self.0.as_bytes();
        b.len() == MAX_PLATE_LEN
            && b[0..2].iter().all(u8::is_ascii_uppercase)
            && b[2..4].iter().all(u8::is_ascii_digit)
            && b[4..6].iter().all(u8::is_ascii_uppercase)
            && b[6..10].iter().all(u8::is_ascii_digit)
    }
}

impl std::fmt::Display for NormalizedPlate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a raw OCR string.
///
/// Trims, drops every non-ASCII-alphanumeric char, uppercases, and clips to
/// the first 10 characters. Longer identifiers are clipped silently.
pub fn normalize(raw: &str) -> NormalizedPlate {
    let plate: String = raw
        .trim()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(MAX_PLATE_LEN)
        .collect();
    NormalizedPlate(plate)
}
