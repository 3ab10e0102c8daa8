use serde::{Deserialize, Serialize};

/// Candidate query produced by the generation pipeline. Inserted with
/// insert-or-ignore semantics on (category, persona_id, hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSuggestion {
    pub topic_id: i64,
    pub persona_id: i64,
    pub category: String,
    pub text: String,
    pub normalized: String,
    pub hash: String,
    pub source: String,
    pub score_auto: i32,
}
