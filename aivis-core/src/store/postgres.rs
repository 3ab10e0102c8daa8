use super::{BrandStore, GenerationStore, MonitorStore, StoreResult};
use crate::error::StoreError;
use crate::models::{
    Brand, BrandCatalog, NewSuggestion, Persona, Prompt, PromptStatus, ResponseRecord, Run,
    RunMetrics, RunStatus, SearchQueryStat, Topic,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// PostgreSQL store. Tables are described in `db/schema.sql`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(FromRow)]
struct RunRow {
    id: i64,
    model: String,
    temperature: Option<f32>,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = RunStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Constraint(format!("unknown run status '{}'", row.status)))?;
        Ok(Run {
            id: row.id,
            model: row.model,
            temperature: row.temperature,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error: row.error,
        })
    }
}

#[derive(FromRow)]
struct PromptRow {
    id: i64,
    category: String,
    text: String,
    source: Option<String>,
    search_volume: Option<i32>,
    is_paused: Option<bool>,
    status: String,
    deleted_at: Option<DateTime<Utc>>,
    persona_id: Option<i64>,
    normalized_hash: String,
}

impl TryFrom<PromptRow> for Prompt {
    type Error = StoreError;

    fn try_from(row: PromptRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "suggested" => PromptStatus::Suggested,
            "approved" => PromptStatus::Approved,
            "active" => PromptStatus::Active,
            "paused" => PromptStatus::Paused,
            "archived" => PromptStatus::Archived,
            other => return Err(StoreError::Constraint(format!("unknown prompt status '{other}'"))),
        };
        Ok(Prompt {
            id: row.id,
            category: row.category,
            text: row.text,
            source: row.source,
            search_volume: row.search_volume,
            is_paused: row.is_paused,
            status,
            deleted_at: row.deleted_at,
            persona_id: row.persona_id,
            normalized_hash: row.normalized_hash,
        })
    }
}

#[derive(FromRow)]
struct TopicRow {
    id: i64,
    name: String,
    category: String,
    locale: String,
    country: String,
    last_generated_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct PersonaRow {
    id: i64,
    topic_id: i64,
    name: String,
    description: String,
    attributes: serde_json::Value,
    brand_id: Option<String>,
    is_active: bool,
}

const RUN_COLUMNS: &str = "id, model, temperature, status, started_at, finished_at, error";

// ============================================================================
// Trait impls
// ============================================================================

#[async_trait]
impl BrandStore for PgStore {
    async fn load_brand_catalog(&self) -> StoreResult<BrandCatalog> {
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT b.id, b.name, a.alias
             FROM brands b
             LEFT JOIN brand_aliases a ON a.brand_id = b.id
             ORDER BY b.name, b.id, a.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut brands: Vec<Brand> = Vec::new();
        for (id, name, alias) in rows {
            if brands.last().map_or(true, |b| b.id != id) {
                brands.push(Brand {
                    id,
                    name,
                    aliases: Vec::new(),
                });
            }
            if let (Some(alias), Some(brand)) = (alias, brands.last_mut()) {
                brand.aliases.push(alias);
            }
        }
        Ok(BrandCatalog::new(brands))
    }
}

#[async_trait]
impl MonitorStore for PgStore {
    async fn create_run(&self, model: &str, temperature: Option<f32>) -> StoreResult<Run> {
        let row: RunRow = sqlx::query_as(&format!(
            "INSERT INTO runs (model, temperature, status, started_at)
             VALUES ($1, $2, 'running', now())
             RETURNING {RUN_COLUMNS}"
        ))
        .bind(model)
        .bind(temperature)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_run(&self, run_id: i64) -> StoreResult<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Run::try_from).transpose()
    }

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<Run>> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Run::try_from).collect()
    }

    async fn finish_run(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE runs SET status = $2, finished_at = now(), error = $3
             WHERE id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_prompt_page(&self, offset: i64, limit: i64) -> StoreResult<Vec<Prompt>> {
        let rows: Vec<PromptRow> = sqlx::query_as(
            "SELECT id, category, text, source, search_volume, is_paused, status,
                    deleted_at, persona_id, normalized_hash
             FROM prompts
             WHERE deleted_at IS NULL
               AND status IN ('approved', 'active')
               AND (is_paused = false OR is_paused IS NULL)
             ORDER BY id
             OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Prompt::try_from).collect()
    }

    async fn save_response(&self, record: &ResponseRecord) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        let (response_id,): (i64,) = sqlx::query_as(
            "INSERT INTO responses
                (run_id, prompt_id, prompt_text, prompt_category, raw_answer,
                 latency_ms, tokens_in, tokens_out, intent)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(record.run_id)
        .bind(record.prompt_id)
        .bind(&record.prompt_text)
        .bind(&record.prompt_category)
        .bind(&record.raw_answer)
        .bind(record.latency_ms)
        .bind(record.tokens_in)
        .bind(record.tokens_out)
        .bind(record.intent.as_str())
        .fetch_one(&mut *tx)
        .await?;

        for mention in &record.mentions {
            sqlx::query(
                "INSERT INTO mentions (response_id, brand_id, found_alias, sentiment)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (response_id, brand_id) DO NOTHING",
            )
            .bind(response_id)
            .bind(&mention.brand_id)
            .bind(&mention.found_alias)
            .bind(mention.sentiment.map(|s| s.as_str()))
            .execute(&mut *tx)
            .await?;
        }

        for link in &record.links {
            sqlx::query(
                "INSERT INTO response_links (response_id, url, anchor, source)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (response_id, url) DO NOTHING",
            )
            .bind(response_id)
            .bind(&link.url)
            .bind(&link.anchor)
            .bind(&link.source)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(response_id)
    }

    async fn run_metrics(&self, run_id: i64) -> StoreResult<RunMetrics> {
        let (prompts_processed, mentions_found, brands_mentioned): (i64, i64, i64) = sqlx::query_as(
            "SELECT
                (SELECT COUNT(*) FROM responses WHERE run_id = $1)::bigint,
                COUNT(m.id)::bigint,
                COUNT(DISTINCT m.brand_id)::bigint
             FROM responses r
             JOIN mentions m ON m.response_id = r.id
             WHERE r.run_id = $1",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(RunMetrics {
            prompts_processed,
            mentions_found,
            brands_mentioned,
        })
    }
}

#[async_trait]
impl GenerationStore for PgStore {
    async fn get_topic(&self, topic_id: i64) -> StoreResult<Option<Topic>> {
        let row: Option<TopicRow> = sqlx::query_as(
            "SELECT id, name, category, locale, country, last_generated_at FROM topics WHERE id = $1",
        )
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Topic {
            id: r.id,
            name: r.name,
            category: r.category,
            locale: r.locale,
            country: r.country,
            last_generated_at: r.last_generated_at,
        }))
    }

    async fn list_personas(&self, topic_id: i64) -> StoreResult<Vec<Persona>> {
        let rows: Vec<PersonaRow> = sqlx::query_as(
            "SELECT id, topic_id, name, description, attributes, brand_id, is_active
             FROM personas
             WHERE topic_id = $1 AND is_active
             ORDER BY id",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Persona {
                id: r.id,
                topic_id: r.topic_id,
                name: r.name,
                description: r.description,
                attributes: r.attributes,
                brand_id: r.brand_id,
                is_active: r.is_active,
            })
            .collect())
    }

    async fn top_search_queries(&self, property: Option<&str>, limit: i64) -> StoreResult<Vec<SearchQueryStat>> {
        let rows = sqlx::query_as::<_, SearchQueryStat>(
            "SELECT query, impressions
             FROM search_query_stats
             WHERE ($1::text IS NULL OR property = $1)
             ORDER BY impressions DESC, id
             LIMIT $2",
        )
        .bind(property)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_suggestion(&self, s: &NewSuggestion) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO raw_suggestions
                (topic_id, persona_id, category, text, normalized, hash, source, score_auto, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'new')
             ON CONFLICT (category, persona_id, hash) DO NOTHING",
        )
        .bind(s.topic_id)
        .bind(s.persona_id)
        .bind(&s.category)
        .bind(&s.text)
        .bind(&s.normalized)
        .bind(&s.hash)
        .bind(&s.source)
        .bind(s.score_auto)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_topic_generated(&self, topic_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE topics SET last_generated_at = $2 WHERE id = $1")
            .bind(topic_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "topic",
                id: topic_id.to_string(),
            });
        }
        Ok(())
    }
}
