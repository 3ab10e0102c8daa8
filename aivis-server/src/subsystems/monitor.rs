//! Monitoring run engine.
//!
//! A run pages through monitorable prompts, sends each page to the answer
//! provider in bounded waves, and persists every result (response, mentions,
//! links) in its own transaction. Lifecycle: `running -> completed | stopped | failed`.

use crate::subsystems::notify::{notify_best_effort, Notifier};
use aivis_core::config::{api_key_from_env, AivisConfig, MonitorConfig};
use aivis_core::links::extract_links;
use aivis_core::llm::{ChatBackend, ChatRequest, LlmClientConfig, OpenAiChatClient};
use aivis_core::mentions::MentionMatcher;
use aivis_core::models::{LinkRecord, MentionRecord, Prompt, ResponseRecord, RunStatus};
use aivis_core::serp::{SerpApiClient, SerpClientConfig};
use aivis_core::store::MonitorStore;
use aivis_core::{classify_intent, RunMode, SentimentDetector};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's question accurately and concisely.";

// ============================================================================
// Answer providers
// ============================================================================

/// One provider answer before mention/link extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAnswer {
    pub text: String,
    pub tokens_in: Option<i32>,
    pub tokens_out: Option<i32>,
    /// Structured citations returned alongside the text.
    pub links: Vec<LinkRecord>,
}

#[async_trait]
pub trait AnswerProvider: Send + Sync {
    async fn answer(&self, prompt: &str) -> anyhow::Result<ProviderAnswer>;

    /// Stored on the run as its model identifier.
    fn model(&self) -> String;

    fn temperature(&self) -> Option<f32>;
}

/// Chat-completion answers (OpenAI-compatible).
pub struct ChatAnswerProvider {
    backend: Arc<dyn ChatBackend>,
    temperature: Option<f32>,
}

impl ChatAnswerProvider {
    pub fn new(backend: Arc<dyn ChatBackend>, temperature: Option<f32>) -> Self {
        Self {
            backend,
            temperature,
        }
    }
}

#[async_trait]
impl AnswerProvider for ChatAnswerProvider {
    async fn answer(&self, prompt: &str) -> anyhow::Result<ProviderAnswer> {
        let request = ChatRequest {
            system: CHAT_SYSTEM_PROMPT.to_string(),
            user: prompt.to_string(),
            temperature: self.temperature,
            json: false,
            max_tokens: None,
        };
        let completion = self.backend.complete(&request).await?;
        Ok(ProviderAnswer {
            text: completion.content,
            tokens_in: completion.tokens_in,
            tokens_out: completion.tokens_out,
            links: Vec::new(),
        })
    }

    fn model(&self) -> String {
        self.backend.model().to_string()
    }

    fn temperature(&self) -> Option<f32> {
        self.temperature
    }
}

/// Google AI overview answers via SerpAPI.
pub struct AiOverviewProvider {
    client: Arc<SerpApiClient>,
}

impl AiOverviewProvider {
    pub fn new(client: Arc<SerpApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnswerProvider for AiOverviewProvider {
    async fn answer(&self, prompt: &str) -> anyhow::Result<ProviderAnswer> {
        let overview = self.client.ai_overview(prompt).await?;
        Ok(ProviderAnswer {
            text: overview.text,
            tokens_in: None,
            tokens_out: None,
            links: overview.links,
        })
    }

    fn model(&self) -> String {
        "google-ai-overview".to_string()
    }

    fn temperature(&self) -> Option<f32> {
        None
    }
}

pub fn openai_backend(config: &AivisConfig) -> anyhow::Result<Arc<dyn ChatBackend>> {
    let openai = &config.openai;
    let mut client_config = LlmClientConfig::new(
        api_key_from_env(&openai.api_key_env),
        &openai.model,
        &openai.base_url,
    );
    client_config.timeout = Duration::from_secs(openai.timeout_seconds);
    client_config.connect_timeout = Duration::from_secs(openai.connect_timeout_seconds);
    let client = OpenAiChatClient::new(client_config)
        .with_context(|| format!("OpenAI client unavailable (set {})", openai.api_key_env))?;
    Ok(Arc::new(client))
}

pub fn serp_client(config: &AivisConfig) -> anyhow::Result<Arc<SerpApiClient>> {
    let serp = &config.serpapi;
    let mut client_config =
        SerpClientConfig::new(api_key_from_env(&serp.api_key_env), &serp.base_url);
    client_config.hl = serp.hl.clone();
    client_config.gl = serp.gl.clone();
    client_config.location = serp.location.clone();
    client_config.timeout = Duration::from_secs(serp.timeout_seconds);
    client_config.connect_timeout = Duration::from_secs(serp.connect_timeout_seconds);
    let client = SerpApiClient::new(client_config)
        .with_context(|| format!("SerpAPI client unavailable (set {})", serp.api_key_env))?;
    Ok(Arc::new(client))
}

/// Build the provider for `mode`. Missing credentials fail here, before any
/// run row exists.
pub fn answer_provider(config: &AivisConfig, mode: RunMode) -> anyhow::Result<Arc<dyn AnswerProvider>> {
    let provider: Arc<dyn AnswerProvider> = match mode {
        RunMode::Chat => Arc::new(ChatAnswerProvider::new(openai_backend(config)?, config.openai.temperature)),
        RunMode::Aio => Arc::new(AiOverviewProvider::new(serp_client(config)?)),
    };
    Ok(provider)
}

// ============================================================================
// Settings and results
// ============================================================================

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub page_size: i64,
    pub concurrency: usize,
    pub wave_delay: Duration,
    /// 0 = run until the prompt list is exhausted.
    pub max_pages: u32,
}

impl MonitorSettings {
    pub fn for_mode(config: &MonitorConfig, mode: RunMode) -> Self {
        let (concurrency, delay_ms) = match mode {
            RunMode::Chat => (config.concurrency, config.wave_delay_ms),
            RunMode::Aio => (config.aio_concurrency, config.aio_wave_delay_ms),
        };
        Self {
            page_size: i64::from(config.page_size.max(1)),
            concurrency: concurrency.max(1),
            wave_delay: Duration::from_millis(delay_ms),
            max_pages: config.max_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptError {
    pub prompt_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: i64,
    pub model: String,
    pub processed: usize,
    pub errors: Vec<PromptError>,
    pub prompt_ids: Vec<i64>,
    pub done: bool,
    /// Offset to pass back when `done` is false.
    pub next_offset: i64,
}

// ============================================================================
// Engine
// ============================================================================

pub struct MonitorEngine {
    store: Arc<dyn MonitorStore>,
    provider: Arc<dyn AnswerProvider>,
    sentiment: SentimentDetector,
    notifier: Arc<dyn Notifier>,
    settings: MonitorSettings,
}

impl MonitorEngine {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        provider: Arc<dyn AnswerProvider>,
        sentiment: SentimentDetector,
        notifier: Arc<dyn Notifier>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            store,
            provider,
            sentiment,
            notifier,
            settings,
        }
    }

    /// Start a new run at `offset`, or continue `run_id` from `offset`.
    pub async fn run_monitoring(&self, offset: i64, run_id: Option<i64>) -> anyhow::Result<RunResult> {
        let run = match run_id {
            Some(id) => self
                .store
                .get_run(id)
                .await?
                .with_context(|| format!("run {id} not found"))?,
            None => {
                self.store
                    .create_run(&self.provider.model(), self.provider.temperature())
                    .await?
            }
        };

        let mut result = RunResult {
            run_id: run.id,
            model: run.model.clone(),
            processed: 0,
            errors: Vec::new(),
            prompt_ids: Vec::new(),
            done: false,
            next_offset: offset.max(0),
        };

        if run.status.is_terminal() {
            tracing::info!(run_id = run.id, status = run.status.as_str(), "Run already finished");
            result.done = true;
            return Ok(result);
        }

        tracing::info!(run_id = run.id, model = %run.model, offset, "Monitoring run started");

        match self.drive(&mut result).await {
            Ok(()) => Ok(result),
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(run_id = run.id, error = %message, "Monitoring run failed");
                if let Err(store_err) = self
                    .store
                    .finish_run(run.id, RunStatus::Failed, Some(&message))
                    .await
                {
                    tracing::error!(run_id = run.id, error = %store_err, "Could not mark run failed");
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, result: &mut RunResult) -> anyhow::Result<()> {
        let run_id = result.run_id;
        let catalog = self.store.load_brand_catalog().await?;
        let matcher = MentionMatcher::new(&catalog);
        let mut pages = 0u32;
        let mut first_wave = true;

        loop {
            let status = self
                .store
                .get_run(run_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(RunStatus::Running);
            if status != RunStatus::Running {
                tracing::info!(run_id, status = status.as_str(), "Run no longer running, stopping");
                result.done = true;
                return Ok(());
            }

            if self.settings.max_pages > 0 && pages >= self.settings.max_pages {
                tracing::info!(run_id, next_offset = result.next_offset, "Page limit reached");
                return Ok(());
            }

            let page = self
                .store
                .fetch_prompt_page(result.next_offset, self.settings.page_size)
                .await?;
            if page.is_empty() {
                self.complete(run_id).await?;
                result.done = true;
                return Ok(());
            }

            tracing::debug!(run_id, offset = result.next_offset, prompts = page.len(), "Processing page");

            for wave in page.chunks(self.settings.concurrency) {
                if !first_wave && !self.settings.wave_delay.is_zero() {
                    tokio::time::sleep(self.settings.wave_delay).await;
                }
                first_wave = false;

                let answers = join_all(wave.iter().map(|p| self.fetch(p))).await;

                // Persist in batch-index order.
                for (prompt, answer) in wave.iter().zip(answers) {
                    match answer {
                        Ok((answer, latency_ms)) => {
                            match self.persist(run_id, prompt, answer, latency_ms, &matcher).await {
                                Ok(_) => {
                                    result.processed += 1;
                                    result.prompt_ids.push(prompt.id);
                                }
                                Err(e) => {
                                    tracing::warn!(run_id, prompt_id = prompt.id, error = %e, "Result not persisted");
                                    result.errors.push(PromptError {
                                        prompt_id: prompt.id,
                                        error: format!("persist: {e}"),
                                    });
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(run_id, prompt_id = prompt.id, error = %e, "Provider request failed");
                            result.errors.push(PromptError {
                                prompt_id: prompt.id,
                                error: format!("{e:#}"),
                            });
                        }
                    }
                }
            }

            result.next_offset += page.len() as i64;
            pages += 1;
        }
    }

    async fn fetch(&self, prompt: &Prompt) -> anyhow::Result<(ProviderAnswer, i64)> {
        let started = Instant::now();
        let answer = self.provider.answer(&prompt.text).await?;
        Ok((answer, started.elapsed().as_millis() as i64))
    }

    async fn persist(
        &self,
        run_id: i64,
        prompt: &Prompt,
        answer: ProviderAnswer,
        latency_ms: i64,
        matcher: &MentionMatcher,
    ) -> anyhow::Result<i64> {
        let (visible, detected) = matcher.detect(&answer.text);

        let mut mentions = Vec::with_capacity(detected.len());
        for hit in detected {
            let context = self.sentiment.context(&visible, hit.offset);
            let sentiment = self.sentiment.detect(&context).await;
            mentions.push(MentionRecord {
                brand_id: hit.brand_id,
                found_alias: hit.found_alias,
                sentiment: Some(sentiment),
            });
        }

        let record = ResponseRecord {
            run_id,
            prompt_id: prompt.id,
            prompt_text: prompt.text.clone(),
            prompt_category: prompt.category.clone(),
            intent: classify_intent(&answer.text),
            links: extract_links(&answer.text, &answer.links),
            raw_answer: answer.text,
            latency_ms,
            tokens_in: answer.tokens_in,
            tokens_out: answer.tokens_out,
            mentions,
        };

        let id = self.store.save_response(&record).await?;
        tracing::debug!(
            run_id,
            prompt_id = prompt.id,
            response_id = id,
            mentions = record.mentions.len(),
            links = record.links.len(),
            "Result persisted"
        );
        Ok(id)
    }

    async fn complete(&self, run_id: i64) -> anyhow::Result<()> {
        if !self.store.finish_run(run_id, RunStatus::Completed, None).await? {
            tracing::info!(run_id, "Run left running before completion, status kept");
            return Ok(());
        }
        match self.store.run_metrics(run_id).await {
            Ok(metrics) => notify_best_effort(self.notifier.as_ref(), run_id, &metrics).await,
            Err(e) => tracing::warn!(run_id, error = %e, "Run metrics unavailable, notification skipped"),
        }
        Ok(())
    }
}
