use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub locale: String,
    pub country: String,
    pub last_generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: i64,
    pub topic_id: i64,
    pub name: String,
    pub description: String,
    pub attributes: serde_json::Value,
    pub brand_id: Option<String>,
    pub is_active: bool,
}

/// Search-console style history row used for relevance weights.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SearchQueryStat {
    pub query: String,
    pub impressions: i64,
}
