use serde::{Deserialize, Serialize};

/// Which answer provider a monitoring run talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Chat,
    Aio,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Chat => "chat",
            RunMode::Aio => "aio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" | "gpt" | "openai" => Some(RunMode::Chat),
            "aio" | "ai_overview" | "serp" => Some(RunMode::Aio),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AivisRequest {
    Ping,
    Health,
    RunMonitoring {
        #[serde(default)]
        mode: RunMode,
        #[serde(default)]
        offset: i64,
        /// Continue an existing run instead of creating one.
        run_id: Option<i64>,
        max_pages: Option<u32>,
    },
    StopRun {
        run_id: i64,
    },
    RunStatus {
        run_id: i64,
    },
    ListRuns {
        limit: Option<i64>,
    },
    GenerateTopic {
        topic_id: i64,
        #[serde(default)]
        force: bool,
    },
    ProcessTopicPersonas {
        topic_id: i64,
        #[serde(default)]
        start: usize,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AivisResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl AivisResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }
}
