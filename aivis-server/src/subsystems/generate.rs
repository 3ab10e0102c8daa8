//! Topic query generation.
//!
//! For each persona of a topic, every configured provider is asked for
//! generic and branded search queries. Outputs are ranked per provider,
//! merged into a balanced selection, optionally enriched with PAA questions
//! and stored as suggestions. Personas are handled in slices so one call
//! stays inside the generation deadline.

use crate::subsystems::monitor::openai_backend;
use crate::subsystems::paa::PaaService;
use aivis_core::brands::{brand_tokens, BrandTokens};
use aivis_core::config::{api_key_from_env, AivisConfig, GenerationConfig, PaaConfig};
use aivis_core::llm::{parse_json_reply, ChatBackend, ChatRequest, GeminiChatClient, LlmClientConfig};
use aivis_core::models::{BrandCatalog, NewSuggestion, Persona, Topic};
use aivis_core::normalize;
use aivis_core::ranking::{
    accept_paa_question, rank_provider_output, sanitize, select_across_providers, suggestion_score,
    GeneratedQueries, RankedQuery, RankingLimits,
};
use aivis_core::relevance::weights_from_rows;
use aivis_core::store::GenerationStore;
use aivis_core::CircuitBreaker;
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Request-scoped context
// ============================================================================

/// Deadline and PAA call budget for one generation request.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    deadline: Instant,
    paa_calls_left: u32,
}

impl GenerationContext {
    pub fn new(budget: Duration, paa_calls: u32) -> Self {
        Self {
            deadline: Instant::now() + budget,
            paa_calls_left: paa_calls,
        }
    }

    /// True once the budget is spent. Checked before starting a call; calls
    /// already in flight run to completion under their client timeout.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Consume one PAA call from the budget.
    pub fn take_paa_call(&mut self) -> bool {
        if self.paa_calls_left == 0 {
            return false;
        }
        self.paa_calls_left -= 1;
        true
    }
}

// ============================================================================
// Settings and results
// ============================================================================

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub limits: RankingLimits,
    pub total_cap: usize,
    pub persona_slice: usize,
    pub budget: Duration,
    pub cooldown: chrono::Duration,
    pub weights_limit: i64,
    pub weights_property: Option<String>,
    pub paa_max_calls: u32,
    pub paa_max_questions_per_seed: usize,
    pub paa_score: i32,
}

impl GenerationSettings {
    pub fn from_config(generation: &GenerationConfig, paa: &PaaConfig) -> Self {
        Self {
            limits: RankingLimits {
                per_provider_cap: generation.per_provider_cap,
                min_branded: generation.min_branded,
                branded_bonus: generation.branded_bonus,
            },
            total_cap: generation.total_cap,
            persona_slice: generation.persona_slice.max(1),
            budget: Duration::from_secs(generation.budget_seconds),
            cooldown: chrono::Duration::minutes(generation.cooldown_minutes),
            weights_limit: generation.weights_limit,
            weights_property: generation.weights_property.clone(),
            paa_max_calls: if paa.enabled { paa.max_calls } else { 0 },
            paa_max_questions_per_seed: paa.max_questions_per_seed,
            paa_score: paa.score,
        }
    }
}

/// Result of one persona slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed_personas: usize,
    pub generated: usize,
    pub next_persona: usize,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicGeneration {
    pub topic_id: i64,
    pub processed_personas: usize,
    pub generated: usize,
    /// True once every persona ran and the topic was stamped.
    pub completed: bool,
    /// Seconds left on the cooldown when the request was refused.
    pub cooldown_remaining_secs: Option<i64>,
}

// ============================================================================
// Generator
// ============================================================================

pub struct QueryGenerator {
    store: Arc<dyn GenerationStore>,
    providers: Vec<Arc<dyn ChatBackend>>,
    breaker: CircuitBreaker,
    paa: Option<Arc<PaaService>>,
    settings: GenerationSettings,
}

impl QueryGenerator {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        providers: Vec<Arc<dyn ChatBackend>>,
        breaker: CircuitBreaker,
        paa: Option<Arc<PaaService>>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            providers,
            breaker,
            paa,
            settings,
        }
    }

    pub fn new_context(&self) -> GenerationContext {
        GenerationContext::new(self.settings.budget, self.settings.paa_max_calls)
    }

    /// Process up to one slice of personas starting at index `start`.
    pub async fn process_topic_personas(
        &self,
        topic_id: i64,
        start: usize,
        ctx: &mut GenerationContext,
    ) -> anyhow::Result<BatchResult> {
        let topic = self
            .store
            .get_topic(topic_id)
            .await?
            .with_context(|| format!("topic {topic_id} not found"))?;
        let personas = self.store.list_personas(topic_id).await?;
        let start = start.min(personas.len());
        let mut batch = BatchResult {
            processed_personas: 0,
            generated: 0,
            next_persona: start,
            done: start >= personas.len(),
        };
        if batch.done || ctx.expired() {
            return Ok(batch);
        }

        let catalog = self.store.load_brand_catalog().await?;
        let stats = self
            .store
            .top_search_queries(self.settings.weights_property.as_deref(), self.settings.weights_limit)
            .await?;
        let weights = weights_from_rows(&stats);

        let end = (start + self.settings.persona_slice).min(personas.len());
        for persona in &personas[start..end] {
            if ctx.expired() {
                tracing::info!(topic_id, persona_id = persona.id, "Generation deadline reached");
                break;
            }
            batch.generated += self.generate_for_persona(&topic, persona, &catalog, &weights, ctx).await?;
            batch.processed_personas += 1;
        }

        batch.next_persona = start + batch.processed_personas;
        batch.done = batch.next_persona >= personas.len();
        Ok(batch)
    }

    /// Run every persona slice of a topic, then stamp `last_generated_at`.
    /// Refused while the topic is cooling down unless `force` is set.
    pub async fn generate_topic(&self, topic_id: i64, force: bool) -> anyhow::Result<TopicGeneration> {
        let topic = self
            .store
            .get_topic(topic_id)
            .await?
            .with_context(|| format!("topic {topic_id} not found"))?;

        let mut summary = TopicGeneration {
            topic_id,
            processed_personas: 0,
            generated: 0,
            completed: false,
            cooldown_remaining_secs: None,
        };

        if let Some(last) = topic.last_generated_at {
            let ready_at = last + self.settings.cooldown;
            let now = Utc::now();
            if !force && now < ready_at {
                let remaining = (ready_at - now).num_seconds().max(1);
                tracing::info!(topic_id, remaining_secs = remaining, "Topic generation cooling down");
                summary.cooldown_remaining_secs = Some(remaining);
                return Ok(summary);
            }
        }

        let mut start = 0;
        loop {
            let mut ctx = self.new_context();
            let batch = self.process_topic_personas(topic_id, start, &mut ctx).await?;
            summary.processed_personas += batch.processed_personas;
            summary.generated += batch.generated;
            if batch.done {
                break;
            }
            if batch.processed_personas == 0 {
                tracing::warn!(topic_id, next_persona = batch.next_persona, "No progress within budget, stopping");
                return Ok(summary);
            }
            start = batch.next_persona;
        }

        self.store.mark_topic_generated(topic_id, Utc::now()).await?;
        summary.completed = true;
        tracing::info!(
            topic_id,
            personas = summary.processed_personas,
            generated = summary.generated,
            "Topic generation completed"
        );
        Ok(summary)
    }

    async fn generate_for_persona(
        &self,
        topic: &Topic,
        persona: &Persona,
        catalog: &BrandCatalog,
        weights: &HashMap<String, i64>,
        ctx: &mut GenerationContext,
    ) -> anyhow::Result<usize> {
        let tokens = brand_tokens(catalog, persona.brand_id.as_deref());
        let has_brand = tokens.has_brand();

        let mut queues: Vec<Vec<RankedQuery>> = Vec::new();
        for provider in &self.providers {
            if ctx.expired() {
                break;
            }
            let name = provider.name().to_string();
            if !self.breaker.allow(&name).await {
                tracing::info!(provider = %name, "Circuit open, skipping provider");
                continue;
            }
            match self.request_queries(provider.as_ref(), topic, persona, &tokens).await {
                Ok(raw) => {
                    self.breaker.record_success(&name).await;
                    let clean = sanitize(raw, &tokens);
                    queues.push(rank_provider_output(&name, &clean, has_brand, weights, self.settings.limits));
                }
                Err(e) => {
                    tracing::warn!(provider = %name, persona_id = persona.id, error = %e, "Query generation failed");
                    self.breaker.record_failure(&name).await;
                }
            }
        }

        if queues.iter().all(Vec::is_empty) {
            tracing::warn!(persona_id = persona.id, "No usable provider output for persona");
            return Ok(0);
        }

        let selected = select_across_providers(queues, self.settings.total_cap, has_brand);
        let mut generated = 0;
        for query in &selected {
            let score = suggestion_score(query.weight);
            if self.insert(topic, persona, &query.text, &query.source_tag(), score).await? {
                generated += 1;
            }
        }

        if let Some(paa) = &self.paa {
            generated += self.enrich_with_paa(paa, topic, persona, &selected, &tokens, ctx).await?;
        }

        tracing::debug!(persona_id = persona.id, selected = selected.len(), generated, "Persona processed");
        Ok(generated)
    }

    async fn enrich_with_paa(
        &self,
        paa: &PaaService,
        topic: &Topic,
        persona: &Persona,
        seeds: &[RankedQuery],
        tokens: &BrandTokens,
        ctx: &mut GenerationContext,
    ) -> anyhow::Result<usize> {
        let mut generated = 0;
        for seed in seeds {
            if ctx.expired() {
                break;
            }
            let questions = paa.questions(&seed.text, &topic.locale, &topic.country, ctx).await;
            let source = if seed.branded { "paa-serpapi-branded" } else { "paa-serpapi" };
            for question in questions
                .iter()
                .filter(|q| accept_paa_question(q, seed.branded, tokens))
                .take(self.settings.paa_max_questions_per_seed)
            {
                if self.insert(topic, persona, question, source, self.settings.paa_score).await? {
                    generated += 1;
                }
            }
        }
        Ok(generated)
    }

    async fn request_queries(
        &self,
        provider: &dyn ChatBackend,
        topic: &Topic,
        persona: &Persona,
        tokens: &BrandTokens,
    ) -> anyhow::Result<GeneratedQueries> {
        let request = ChatRequest {
            system: "You generate realistic search-engine queries. Return only raw JSON matching \
                     {\"generic\": [string], \"branded\": [string]} with no commentary."
                .to_string(),
            user: build_generation_prompt(topic, persona, tokens, self.settings.limits.per_provider_cap),
            temperature: Some(0.7),
            json: true,
            max_tokens: None,
        };
        let completion = provider.complete(&request).await?;
        Ok(parse_json_reply::<GeneratedQueries>(&completion.content)?)
    }

    async fn insert(&self, topic: &Topic, persona: &Persona, text: &str, source: &str, score: i32) -> anyhow::Result<bool> {
        let (normalized, hash) = normalize::normalize_and_hash(text);
        if normalized.is_empty() {
            return Ok(false);
        }
        let suggestion = NewSuggestion {
            topic_id: topic.id,
            persona_id: persona.id,
            category: topic.category.clone(),
            text: text.trim().to_string(),
            normalized,
            hash,
            source: source.to_string(),
            score_auto: score,
        };
        Ok(self.store.insert_suggestion(&suggestion).await?)
    }
}

/// User prompt for one persona and provider.
pub fn build_generation_prompt(topic: &Topic, persona: &Persona, tokens: &BrandTokens, count: usize) -> String {
    let mut prompt = format!(
        "Topic: {}\nCategory: {}\nLocale: {} ({})\n\nPersona: {}\n{}\n",
        topic.name, topic.category, topic.locale, topic.country, persona.name, persona.description
    );
    if let Some(attrs) = persona.attributes.as_object().filter(|a| !a.is_empty()) {
        prompt.push_str("Attributes:\n");
        for (key, value) in attrs {
            let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            prompt.push_str(&format!("- {key}: {value}\n"));
        }
    }
    prompt.push_str(&format!(
        "\nWrite up to {count} generic queries this persona would type into a search engine"
    ));
    if tokens.has_brand() {
        prompt.push_str(&format!(
            " and up to {count} branded queries that name the brand ({}).",
            tokens.brand.join(", ")
        ));
        if !tokens.competitors.is_empty() {
            let hint: Vec<&str> = tokens.competitors.iter().take(10).map(String::as_str).collect();
            prompt.push_str(&format!(" Do not name competitors ({}) in branded queries.", hint.join(", ")));
        }
    } else {
        prompt.push_str(". Leave \"branded\" empty.");
    }
    prompt.push_str(&format!(" Write the queries in the {} language.", topic.locale));
    prompt
}

/// Generation backends named in config. Providers without credentials are
/// skipped with a warning.
pub fn generation_providers(config: &AivisConfig) -> Vec<Arc<dyn ChatBackend>> {
    let mut providers: Vec<Arc<dyn ChatBackend>> = Vec::new();
    for name in &config.generation.providers {
        let built = match name.as_str() {
            "openai" => openai_backend(config),
            "gemini" => gemini_backend(config),
            other => Err(anyhow::anyhow!("unknown generation provider '{other}'")),
        };
        match built {
            Ok(p) => providers.push(p),
            Err(e) => tracing::warn!(provider = %name, error = %e, "Generation provider unavailable"),
        }
    }
    providers
}

pub fn gemini_backend(config: &AivisConfig) -> anyhow::Result<Arc<dyn ChatBackend>> {
    let gemini = &config.gemini;
    let mut client_config = LlmClientConfig::new(
        api_key_from_env(&gemini.api_key_env),
        &gemini.model,
        &gemini.base_url,
    );
    client_config.timeout = Duration::from_secs(gemini.timeout_seconds);
    client_config.connect_timeout = Duration::from_secs(gemini.connect_timeout_seconds);
    let client = GeminiChatClient::new(client_config)
        .with_context(|| format!("Gemini client unavailable (set {})", gemini.api_key_env))?;
    Ok(Arc::new(client))
}
