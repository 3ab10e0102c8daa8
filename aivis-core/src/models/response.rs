use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Transactional,
    Navigational,
    Informational,
    Other,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Transactional => "transactional",
            Intent::Navigational => "navigational",
            Intent::Informational => "informational",
            Intent::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionRecord {
    pub brand_id: String,
    pub found_alias: String,
    pub sentiment: Option<Sentiment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub url: String,
    pub anchor: Option<String>,
    pub source: Option<String>,
}

/// Everything persisted for one (run, prompt) result, written in one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub run_id: i64,
    pub prompt_id: i64,
    pub prompt_text: String,
    pub prompt_category: String,
    pub raw_answer: String,
    pub latency_ms: i64,
    pub tokens_in: Option<i32>,
    pub tokens_out: Option<i32>,
    pub intent: Intent,
    pub mentions: Vec<MentionRecord>,
    pub links: Vec<LinkRecord>,
}
