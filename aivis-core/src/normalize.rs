//! Query normalization and dedup hashing.
//!
//! Every suggestion and prompt is keyed by `hash(normalize(text))`, so two
//! queries that differ only in case, accents, spacing, edge punctuation or
//! thousands separators collapse to the same row.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Characters trimmed from both ends after whitespace collapsing.
const EDGE_TRIM: &[char] = &['.', ',', ';', ':', '!', '?', '"', '\''];

fn thousands_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d),(\d{3})\b").expect("thousands regex"))
}

/// Normalize free text for deduplication. Never fails; may return "".
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let ascii = transliterate(&lowered).to_lowercase();
    let collapsed = ascii.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_matches(|c: char| c.is_whitespace() || EDGE_TRIM.contains(&c))
        .to_string();
    strip_thousands_separators(&trimmed)
}

/// Hex SHA-256 of an already-normalized string.
pub fn hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn normalize_and_hash(text: &str) -> (String, String) {
    let normalized = normalize(text);
    let digest = hash(&normalized);
    (normalized, digest)
}

/// Best-effort ASCII transliteration: NFKD with combining marks removed,
/// a few ligatures expanded, anything else outside ASCII dropped.
fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.nfkd() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }
        if is_combining_mark(c) {
            continue;
        }
        match c {
            'ß' => out.push_str("ss"),
            'æ' | 'Æ' => out.push_str("ae"),
            'œ' | 'Œ' => out.push_str("oe"),
            'ø' | 'Ø' => out.push('o'),
            'đ' | 'Đ' => out.push('d'),
            'ł' | 'Ł' => out.push('l'),
            'þ' | 'Þ' => out.push_str("th"),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            c if c.is_whitespace() => out.push(' '),
            _ => {}
        }
    }
    out
}

fn strip_thousands_separators(text: &str) -> String {
    let re = thousands_re();
    let mut current = text.to_string();
    // "1,000,000" needs two passes because matches cannot overlap.
    loop {
        let next = re.replace_all(&current, "$1$2").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}
