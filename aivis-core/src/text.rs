//! Text cleanup shared by mention detection, sentiment and link extraction.

use regex::Regex;
use std::sync::OnceLock;

pub(crate) fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[([^\]\n]*)\]\(\s*(https?://[^\s)]+)[^)]*\)").expect("markdown link regex")
    })
}

pub(crate) fn bare_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>()\[\]"'`]+"#).expect("url regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Visible prose used for mention matching: markdown links are removed
/// whole (anchor text and target), then bare URLs.
pub fn text_only(answer: &str) -> String {
    let without_md = markdown_link_re().replace_all(answer, " ");
    bare_url_re().replace_all(&without_md, " ").into_owned()
}

/// Readable context for sentiment: `[text](url)` becomes `text`, bare URLs
/// are removed and whitespace collapsed.
pub fn readable_text(answer: &str) -> String {
    let anchors = markdown_link_re().replace_all(answer, "$1");
    let no_urls = bare_url_re().replace_all(&anchors, " ");
    collapse_whitespace(&no_urls)
}

pub fn collapse_whitespace(text: &str) -> String {
    whitespace_re().replace_all(text, " ").trim().to_string()
}

/// Up to `budget` chars of `text` around byte offset `at`, starting roughly
/// 40% of the budget before the anchor.
pub fn window(text: &str, at: usize, budget: usize) -> String {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let anchor = chars.iter().position(|(i, _)| *i >= at).unwrap_or(chars.len());
    let lead = budget * 2 / 5;
    let start = anchor.saturating_sub(lead).min(chars.len() - budget);
    chars[start..start + budget].iter().map(|(_, c)| c).collect()
}

/// Strip trailing punctuation that is almost never part of a URL.
pub fn trim_url(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', ':', '!', '?', '*', '_', '>'])
}
