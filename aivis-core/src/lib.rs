pub mod aio;
pub mod brands;
pub mod breaker;
pub mod config;
pub mod db;
pub mod error;
pub mod intent;
pub mod ipc;
pub mod links;
pub mod llm;
pub mod mentions;
pub mod models;
pub mod normalize;
pub mod ranking;
pub mod relevance;
pub mod sentiment;
pub mod serp;
pub mod store;
pub mod text;

pub use brands::{brand_tokens, has_token, BrandTokens};
pub use breaker::{BreakerStore, CircuitBreaker, InMemoryBreakerStore};
pub use config::AivisConfig;
pub use error::{AivisError, StoreError};
pub use intent::classify_intent;
pub use ipc::{AivisRequest, AivisResponse, RunMode};
pub use llm::{ChatBackend, ChatCompletion, ChatRequest, GeminiChatClient, LlmClientConfig, LlmError, OpenAiChatClient};
pub use mentions::{DetectedMention, MentionMatcher};
pub use sentiment::{detect_sentiment_keyword, SentimentDetector};
pub use serp::{SerpApiClient, SerpClientConfig, SerpError};
pub use store::{BrandStore, GenerationStore, MemoryStore, MonitorStore, PgStore};
