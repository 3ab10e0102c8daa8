use super::{BrandStore, GenerationStore, MonitorStore, StoreResult};
use crate::error::StoreError;
use crate::models::{
    Brand, BrandCatalog, LinkRecord, MentionRecord, NewSuggestion, Persona, Prompt, PromptStatus,
    ResponseRecord, Run, RunMetrics, RunStatus, SearchQueryStat, Topic,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// A persisted response with its id.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub id: i64,
    pub record: ResponseRecord,
}

#[derive(Default)]
struct Inner {
    brands: Vec<Brand>,
    prompts: Vec<Prompt>,
    runs: Vec<Run>,
    responses: Vec<StoredResponse>,
    topics: Vec<Topic>,
    personas: Vec<Persona>,
    search_stats: Vec<(Option<String>, SearchQueryStat)>,
    suggestions: Vec<NewSuggestion>,
    failing_prompts: HashSet<i64>,
}

/// In-process store with the same semantics as `PgStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- seeding -----------------------------------------------------------

    pub fn add_brand(&self, id: &str, name: &str, aliases: &[&str]) {
        self.lock().brands.push(Brand {
            id: id.to_string(),
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        });
    }

    /// Adds an active prompt and returns its id.
    pub fn add_prompt(&self, category: &str, text: &str) -> i64 {
        let mut inner = self.lock();
        let id = inner.prompts.len() as i64 + 1;
        inner.prompts.push(Prompt {
            id,
            category: category.to_string(),
            text: text.to_string(),
            source: Some("manual".to_string()),
            search_volume: None,
            is_paused: None,
            status: PromptStatus::Active,
            deleted_at: None,
            persona_id: None,
            normalized_hash: crate::normalize::hash(&crate::normalize::normalize(text)),
        });
        id
    }

    /// Mutate a seeded prompt in place (pause, archive, soft-delete).
    pub fn update_prompt(&self, id: i64, f: impl FnOnce(&mut Prompt)) {
        if let Some(prompt) = self.lock().prompts.iter_mut().find(|p| p.id == id) {
            f(prompt);
        }
    }

    pub fn add_topic(&self, name: &str, category: &str, locale: &str, country: &str) -> i64 {
        let mut inner = self.lock();
        let id = inner.topics.len() as i64 + 1;
        inner.topics.push(Topic {
            id,
            name: name.to_string(),
            category: category.to_string(),
            locale: locale.to_string(),
            country: country.to_string(),
            last_generated_at: None,
        });
        id
    }

    pub fn add_persona(&self, topic_id: i64, name: &str, description: &str, brand_id: Option<&str>) -> i64 {
        let mut inner = self.lock();
        let id = inner.personas.len() as i64 + 1;
        inner.personas.push(Persona {
            id,
            topic_id,
            name: name.to_string(),
            description: description.to_string(),
            attributes: serde_json::json!({}),
            brand_id: brand_id.map(str::to_string),
            is_active: true,
        });
        id
    }

    pub fn add_search_stat(&self, property: Option<&str>, query: &str, impressions: i64) {
        self.lock().search_stats.push((
            property.map(str::to_string),
            SearchQueryStat {
                query: query.to_string(),
                impressions,
            },
        ));
    }

    /// Make `save_response` fail for this prompt, as a constraint violation would.
    pub fn fail_responses_for(&self, prompt_id: i64) {
        self.lock().failing_prompts.insert(prompt_id);
    }

    // ---- inspection --------------------------------------------------------

    pub fn responses(&self) -> Vec<StoredResponse> {
        self.lock().responses.clone()
    }

    pub fn mentions(&self, response_id: i64) -> Vec<MentionRecord> {
        self.lock()
            .responses
            .iter()
            .find(|r| r.id == response_id)
            .map(|r| r.record.mentions.clone())
            .unwrap_or_default()
    }

    pub fn links(&self, response_id: i64) -> Vec<LinkRecord> {
        self.lock()
            .responses
            .iter()
            .find(|r| r.id == response_id)
            .map(|r| r.record.links.clone())
            .unwrap_or_default()
    }

    pub fn suggestions(&self) -> Vec<NewSuggestion> {
        self.lock().suggestions.clone()
    }

    pub fn topic(&self, id: i64) -> Option<Topic> {
        self.lock().topics.iter().find(|t| t.id == id).cloned()
    }
}

#[async_trait]
impl BrandStore for MemoryStore {
    async fn load_brand_catalog(&self) -> StoreResult<BrandCatalog> {
        let mut brands = self.lock().brands.clone();
        brands.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(BrandCatalog::new(brands))
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn create_run(&self, model: &str, temperature: Option<f32>) -> StoreResult<Run> {
        let mut inner = self.lock();
        let run = Run {
            id: inner.runs.len() as i64 + 1,
            model: model.to_string(),
            temperature,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        inner.runs.push(run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: i64) -> StoreResult<Option<Run>> {
        Ok(self.lock().runs.iter().find(|r| r.id == run_id).cloned())
    }

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<Run>> {
        let inner = self.lock();
        Ok(inner
            .runs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn finish_run(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> StoreResult<bool> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "run",
                id: run_id.to_string(),
            })?;
        if run.status != RunStatus::Running {
            return Ok(false);
        }
        run.status = status;
        run.finished_at = Some(Utc::now());
        run.error = error.map(str::to_string);
        Ok(true)
    }

    async fn fetch_prompt_page(&self, offset: i64, limit: i64) -> StoreResult<Vec<Prompt>> {
        let inner = self.lock();
        let mut eligible: Vec<Prompt> = inner
            .prompts
            .iter()
            .filter(|p| p.is_monitorable())
            .cloned()
            .collect();
        eligible.sort_by_key(|p| p.id);
        Ok(eligible
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn save_response(&self, record: &ResponseRecord) -> StoreResult<i64> {
        let mut inner = self.lock();
        if inner.failing_prompts.contains(&record.prompt_id) {
            return Err(StoreError::Constraint(format!(
                "response insert rejected for prompt {}",
                record.prompt_id
            )));
        }
        if inner
            .responses
            .iter()
            .any(|r| r.record.run_id == record.run_id && r.record.prompt_id == record.prompt_id)
        {
            return Err(StoreError::Constraint(format!(
                "duplicate response for run {} prompt {}",
                record.run_id, record.prompt_id
            )));
        }

        // Same conflict rules as the SQL inserts.
        let mut stored = record.clone();
        let mut brands = HashSet::new();
        stored.mentions.retain(|m| brands.insert(m.brand_id.clone()));
        let mut urls = HashSet::new();
        stored.links.retain(|l| urls.insert(l.url.clone()));

        let id = inner.responses.len() as i64 + 1;
        inner.responses.push(StoredResponse { id, record: stored });
        Ok(id)
    }

    async fn run_metrics(&self, run_id: i64) -> StoreResult<RunMetrics> {
        let inner = self.lock();
        let responses: Vec<&StoredResponse> =
            inner.responses.iter().filter(|r| r.record.run_id == run_id).collect();
        let mentions_found = responses.iter().map(|r| r.record.mentions.len() as i64).sum();
        let brands: HashSet<&str> = responses
            .iter()
            .flat_map(|r| r.record.mentions.iter().map(|m| m.brand_id.as_str()))
            .collect();
        Ok(RunMetrics {
            prompts_processed: responses.len() as i64,
            mentions_found,
            brands_mentioned: brands.len() as i64,
        })
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn get_topic(&self, topic_id: i64) -> StoreResult<Option<Topic>> {
        Ok(self.topic(topic_id))
    }

    async fn list_personas(&self, topic_id: i64) -> StoreResult<Vec<Persona>> {
        let mut personas: Vec<Persona> = self
            .lock()
            .personas
            .iter()
            .filter(|p| p.topic_id == topic_id && p.is_active)
            .cloned()
            .collect();
        personas.sort_by_key(|p| p.id);
        Ok(personas)
    }

    async fn top_search_queries(&self, property: Option<&str>, limit: i64) -> StoreResult<Vec<SearchQueryStat>> {
        let inner = self.lock();
        let mut rows: Vec<SearchQueryStat> = inner
            .search_stats
            .iter()
            .filter(|(p, _)| property.is_none() || p.as_deref() == property)
            .map(|(_, s)| s.clone())
            .collect();
        rows.sort_by(|a, b| b.impressions.cmp(&a.impressions));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn insert_suggestion(&self, suggestion: &NewSuggestion) -> StoreResult<bool> {
        let mut inner = self.lock();
        let exists = inner.suggestions.iter().any(|s| {
            s.category == suggestion.category
                && s.persona_id == suggestion.persona_id
                && s.hash == suggestion.hash
        });
        if exists {
            return Ok(false);
        }
        inner.suggestions.push(suggestion.clone());
        Ok(true)
    }

    async fn mark_topic_generated(&self, topic_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.lock();
        let topic = inner
            .topics
            .iter_mut()
            .find(|t| t.id == topic_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "topic",
                id: topic_id.to_string(),
            })?;
        topic.last_generated_at = Some(at);
        Ok(())
    }
}
