use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Suggested,
    Approved,
    Active,
    Paused,
    Archived,
}

impl PromptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStatus::Suggested => "suggested",
            PromptStatus::Approved => "approved",
            PromptStatus::Active => "active",
            PromptStatus::Paused => "paused",
            PromptStatus::Archived => "archived",
        }
    }

    /// Only approved and active prompts are sent to providers.
    pub fn is_monitorable(&self) -> bool {
        matches!(self, PromptStatus::Approved | PromptStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: i64,
    pub category: String,
    pub text: String,
    pub source: Option<String>,
    pub search_volume: Option<i32>,
    pub is_paused: Option<bool>,
    pub status: PromptStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub persona_id: Option<i64>,
    pub normalized_hash: String,
}

impl Prompt {
    pub fn is_monitorable(&self) -> bool {
        self.deleted_at.is_none() && self.status.is_monitorable() && !self.is_paused.unwrap_or(false)
    }
}
