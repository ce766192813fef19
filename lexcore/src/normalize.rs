//! Unicode normalization for lexical lookups.
//!
//! Pipeline: NFKD decomposition -> strip combining marks (when
//! diacritic-insensitive) -> casefold -> collapse non-alphanumeric runs to
//! a single space -> trim.

use unicode_normalization::UnicodeNormalization;

/// Combining marks live almost entirely in a handful of contiguous
/// Unicode blocks. This range list covers the marks produced by NFKD
/// decomposition of Latin, Greek, Cyrillic and Vietnamese text, which is
/// what this core's "diacritic stripping" is scoped to; it does not
/// attempt full Unicode `Mn`/`Mc`/`Me` category coverage.
const COMBINING_RANGES: &[(u32, u32)] = &[
    (0x0300, 0x036F), // Combining Diacritical Marks
    (0x1AB0, 0x1AFF), // Combining Diacritical Marks Extended
    (0x1DC0, 0x1DFF), // Combining Diacritical Marks Supplement
    (0x20D0, 0x20FF), // Combining Diacritical Marks for Symbols
    (0xFE20, 0xFE2F), // Combining Half Marks
];

fn is_combining_mark(c: char) -> bool {
    let cp = c as u32;
    COMBINING_RANGES
        .iter()
        .any(|&(lo, hi)| cp >= lo && cp <= hi)
}

fn collapse_and_trim(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = true; // suppress leading space
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Normalize `s`, stripping diacritics. Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(s: &str) -> String {
    let decomposed: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let folded = casefold(&decomposed);
    collapse_and_trim(&folded)
}

/// Normalize `s` without stripping diacritics (for diacritic-sensitive lookup).
pub fn normalize_preserving_diacritics(s: &str) -> String {
    let decomposed: String = s.nfkd().collect();
    let folded = casefold(&decomposed);
    collapse_and_trim(&folded)
}

fn casefold(s: &str) -> String {
    // `to_lowercase` is not full Unicode case-folding, just a pragmatic
    // char-by-char pass; good enough for the alphabets this core targets.
    s.chars().flat_map(|c| c.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        for s in ["Café", "  HELLO   world  ", "naïve-approach", ""] {
            let once = normalize(s);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn strips_diacritics_and_casefolds() {
        assert_eq!(normalize("Café"), "cafe");
        assert_eq!(normalize("NAIVE"), "naive");
    }

    #[test]
    fn preserves_diacritics_when_requested() {
        assert_eq!(normalize_preserving_diacritics("Café"), "café");
    }

    #[test]
    fn collapses_punctuation_and_trims() {
        assert_eq!(normalize("  hello,   world!! "), "hello world");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("!!!"), "");
    }

    proptest::proptest! {
        #[test]
        fn prop_idempotent(s in ".*") {
            let once = normalize(&s);
            let twice = normalize(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
