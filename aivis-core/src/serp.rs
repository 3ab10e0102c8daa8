//! SerpAPI client: Google AI overviews and People-Also-Ask questions.

use crate::aio::{self, Overview, OverviewOutcome};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Error, Debug)]
pub enum SerpError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SerpAPI error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing SerpAPI key")]
    MissingApiKey,
}

impl SerpError {
    pub fn is_transient(&self) -> bool {
        match self {
            SerpError::Http(e) => e.is_timeout() || e.is_connect(),
            SerpError::Api { code, .. } => *code == 429 || *code >= 500,
            SerpError::MissingApiKey => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerpClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub hl: String,
    pub gl: String,
    pub location: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl SerpClientConfig {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.unwrap_or_default(),
            base_url: base_url.into(),
            hl: "en".to_string(),
            gl: "us".to_string(),
            location: None,
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            max_retries: 1,
            retry_delay_ms: 1000,
        }
    }
}

pub struct SerpApiClient {
    client: Client,
    config: SerpClientConfig,
}

impl SerpApiClient {
    pub fn new(config: SerpClientConfig) -> Result<Self, SerpError> {
        if config.api_key.is_empty() {
            return Err(SerpError::MissingApiKey);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    async fn search_once(&self, params: &[(&str, &str)]) -> Result<Value, SerpError> {
        let url = format!("{}/search.json", self.config.base_url.trim_end_matches('/'));
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("api_key", self.config.api_key.as_str()));

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(body);
            tracing::warn!(code = status.as_u16(), message = %message, "SerpAPI error");
            return Err(SerpError::Api {
                code: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Raw `search.json` call with retry on transient failures.
    pub async fn search(&self, params: &[(&str, &str)]) -> Result<Value, SerpError> {
        let strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);
        RetryIf::spawn(strategy, || self.search_once(params), SerpError::is_transient).await
    }

    fn locale_params<'a>(&'a self, hl: &'a str, gl: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut params = vec![("hl", hl), ("gl", gl)];
        if let Some(location) = self.config.location.as_deref() {
            params.push(("location", location));
        }
        params
    }

    /// Google AI overview for `query`. Error payloads and missing overviews
    /// come back as sentinel text, not errors.
    pub async fn ai_overview(&self, query: &str) -> Result<Overview, SerpError> {
        let mut params = vec![("engine", "google"), ("q", query)];
        params.extend(self.locale_params(&self.config.hl, &self.config.gl));
        let body = self.search(&params).await?;

        let outcome = match aio::parse_search_response(&body) {
            OverviewOutcome::PageToken(token) => {
                tracing::debug!(query, "AI overview deferred, following page_token");
                let follow_up = [("engine", "google_ai_overview"), ("page_token", token.as_str())];
                let body = self.search(&follow_up).await?;
                match body.get("ai_overview") {
                    Some(overview) if body.get("error").is_none() => aio::parse_overview(overview),
                    _ => aio::parse_search_response(&body),
                }
            }
            other => other,
        };

        Ok(match outcome {
            OverviewOutcome::Parsed(overview) => overview,
            OverviewOutcome::Sentinel(text) => Overview {
                text,
                links: Vec::new(),
            },
            OverviewOutcome::PageToken(_) => Overview {
                text: aio::NO_PARSABLE_TEXT.to_string(),
                links: Vec::new(),
            },
        })
    }

    /// People-Also-Ask questions for `query` in the given locale.
    pub async fn related_questions(&self, query: &str, hl: &str, gl: &str) -> Result<Vec<String>, SerpError> {
        let mut params = vec![("engine", "google"), ("q", query)];
        params.extend(self.locale_params(hl, gl));
        let body = self.search(&params).await?;
        Ok(body
            .get("related_questions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|q| q.get("question").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
