//! Persistence seams for the monitoring engine and the generation pipeline.
//!
//! `PgStore` is the production implementation; `MemoryStore` backs tests and
//! dry runs.

pub mod memory;
pub mod postgres;

use crate::error::StoreError;
use crate::models::{
    BrandCatalog, NewSuggestion, Persona, Prompt, ResponseRecord, Run, RunMetrics, RunStatus,
    SearchQueryStat, Topic,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait BrandStore: Send + Sync {
    /// All brands ordered by name, aliases in storage order.
    async fn load_brand_catalog(&self) -> StoreResult<BrandCatalog>;
}

#[async_trait]
pub trait MonitorStore: BrandStore {
    async fn create_run(&self, model: &str, temperature: Option<f32>) -> StoreResult<Run>;

    async fn get_run(&self, run_id: i64) -> StoreResult<Option<Run>>;

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<Run>>;

    /// Move a running run to a terminal status and stamp `finished_at`.
    /// Returns false when the run had already left `running`.
    async fn finish_run(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> StoreResult<bool>;

    /// Monitorable prompts ordered by id.
    async fn fetch_prompt_page(&self, offset: i64, limit: i64) -> StoreResult<Vec<Prompt>>;

    /// Response, mentions and links in one transaction. Returns the response id.
    async fn save_response(&self, record: &ResponseRecord) -> StoreResult<i64>;

    async fn run_metrics(&self, run_id: i64) -> StoreResult<RunMetrics>;
}

#[async_trait]
pub trait GenerationStore: BrandStore {
    async fn get_topic(&self, topic_id: i64) -> StoreResult<Option<Topic>>;

    /// Active personas of a topic ordered by id.
    async fn list_personas(&self, topic_id: i64) -> StoreResult<Vec<Persona>>;

    /// Top rows by impressions, optionally restricted to one property.
    async fn top_search_queries(&self, property: Option<&str>, limit: i64) -> StoreResult<Vec<SearchQueryStat>>;

    /// Insert-or-ignore on (category, persona, hash). True when a row was written.
    async fn insert_suggestion(&self, suggestion: &NewSuggestion) -> StoreResult<bool>;

    async fn mark_topic_generated(&self, topic_id: i64, at: DateTime<Utc>) -> StoreResult<()>;
}
