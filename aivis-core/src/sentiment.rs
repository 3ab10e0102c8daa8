//! Sentiment of a brand mention.
//!
//! `SentimentDetector::detect` asks a chat backend for a one-word label and
//! falls back to `detect_sentiment_keyword` on any failure. The keyword path
//! is deterministic and has no side effects.

use crate::llm::{ChatBackend, ChatRequest};
use crate::models::Sentiment;
use crate::text;
use regex::Regex;
use std::sync::{Arc, OnceLock};

const SYSTEM_INSTRUCTION: &str = "You classify the sentiment expressed toward the brand in the \
given text. Answer with exactly one word: positive, neutral, or negative.";

const STRONG_POSITIVE: &[&str] = &[
    "highly recommend",
    "excellent",
    "outstanding",
    "top-rated",
    "top rated",
    "best-in-class",
    "industry leader",
    "award-winning",
];

const STRONG_NEGATIVE: &[&str] = &[
    "avoid",
    "terrible",
    "worst",
    "horrible",
    "do not recommend",
    "don't recommend",
    "stay away",
    "untrustworthy",
];

const POSITIVE: &[&str] = &[
    "great",
    "good",
    "best",
    "reliable",
    "trusted",
    "popular",
    "fast",
    "easy",
    "generous",
    "recommended",
    "secure",
    "leading",
    "competitive",
    "user-friendly",
    "strong",
    "favorite",
];

const NEGATIVE: &[&str] = &[
    "bad",
    "poor",
    "slow",
    "complaint",
    "complaints",
    "issue",
    "issues",
    "problem",
    "problems",
    "delay",
    "delays",
    "limited",
    "expensive",
    "difficult",
    "frustrating",
    "banned",
    "lawsuit",
    "fined",
];

fn scam_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(scam|scams|scammer|scammed|fraud|fraudulent|illegal|rip-?off|unlicensed|blacklisted|ponzi)\b")
            .expect("scam regex")
    })
}

fn negated_positive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(not|isn't|isnt|is not|aren't|arent|wasn't|wasnt|never|no longer|hardly)\s+(?:(?:very|so|that|really|particularly|too)\s+)?(great|good|reliable|trustworthy|safe|recommended|legit|legitimate|worth|secure|fair)\b",
        )
        .expect("negation regex")
    })
}

fn word_hits(lowered: &str, words: &[&str]) -> usize {
    words
        .iter()
        .filter(|w| contains_word(lowered, w))
        .count()
}

fn contains_word(lowered: &str, word: &str) -> bool {
    lowered.match_indices(word).any(|(i, _)| {
        let before = lowered[..i].chars().next_back();
        let after = lowered[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Deterministic keyword classifier.
pub fn detect_sentiment_keyword(text: &str) -> Sentiment {
    if scam_re().is_match(text) {
        return Sentiment::Negative;
    }
    if negated_positive_re().is_match(text) {
        return Sentiment::Negative;
    }

    let lowered = text.to_lowercase();
    if word_hits(&lowered, STRONG_POSITIVE) > 0 {
        return Sentiment::Positive;
    }
    if word_hits(&lowered, STRONG_NEGATIVE) > 0 {
        return Sentiment::Negative;
    }

    let positive = word_hits(&lowered, POSITIVE);
    let negative = word_hits(&lowered, NEGATIVE);
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// Pull the first label a free-form reply asserts. Negated labels
/// ("not positive", "non-negative") are ignored, so a reply carrying only a
/// negated label yields `None`.
pub fn parse_label(reply: &str) -> Option<Sentiment> {
    let lowered = reply.to_lowercase();
    [
        ("negative", Sentiment::Negative),
        ("positive", Sentiment::Positive),
        ("neutral", Sentiment::Neutral),
    ]
    .into_iter()
    .find(|(label, _)| asserts_label(&lowered, label))
    .map(|(_, s)| s)
}

fn asserts_label(lowered: &str, label: &str) -> bool {
    lowered.match_indices(label).any(|(i, _)| {
        let before = lowered[..i].trim_end();
        !(before.ends_with("not") || before.ends_with("non-") || before.ends_with("isn't"))
    })
}

/// AI-assisted sentiment with keyword fallback. Never fails.
#[derive(Clone)]
pub struct SentimentDetector {
    backend: Option<Arc<dyn ChatBackend>>,
    window_chars: usize,
    min_chars: usize,
}

impl SentimentDetector {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>, window_chars: usize, min_chars: usize) -> Self {
        Self {
            backend,
            window_chars,
            min_chars,
        }
    }

    /// Keyword-only detector (no network).
    pub fn keyword_only() -> Self {
        Self::new(None, 500, 10)
    }

    /// Cleaned, windowed context around `offset` in `visible_text`.
    pub fn context(&self, visible_text: &str, offset: usize) -> String {
        let windowed = text::window(visible_text, offset, self.window_chars);
        text::readable_text(&windowed)
    }

    /// Classify the context text of one mention.
    pub async fn detect(&self, context: &str) -> Sentiment {
        let cleaned = text::readable_text(context);
        let cleaned: String = cleaned.chars().take(self.window_chars).collect();
        if cleaned.chars().count() < self.min_chars {
            return Sentiment::Neutral;
        }

        if let Some(backend) = &self.backend {
            let request = ChatRequest {
                system: SYSTEM_INSTRUCTION.to_string(),
                user: cleaned.clone(),
                temperature: Some(0.0),
                json: false,
                max_tokens: Some(3),
            };
            match backend.complete(&request).await {
                Ok(reply) => match parse_label(&reply.content) {
                    Some(label) => return label,
                    None => tracing::debug!(
                        reply = %reply.content,
                        "Unparseable sentiment reply, using keyword fallback"
                    ),
                },
                Err(e) => tracing::warn!(
                    provider = backend.name(),
                    error = %e,
                    "Sentiment call failed, using keyword fallback"
                ),
            }
        }

        detect_sentiment_keyword(&cleaned)
    }
}
