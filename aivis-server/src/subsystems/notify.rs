//! Best-effort run-completion notifications.

use aivis_core::config::NotifyConfig;
use aivis_core::models::RunMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn run_completed(&self, run_id: i64, metrics: &RunMetrics) -> anyhow::Result<()>;
}

/// Writes the metrics to the log. Always succeeds.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn run_completed(&self, run_id: i64, metrics: &RunMetrics) -> anyhow::Result<()> {
        tracing::info!(
            run_id,
            prompts_processed = metrics.prompts_processed,
            mentions_found = metrics.mentions_found,
            brands_mentioned = metrics.brands_mentioned,
            "Monitoring run completed"
        );
        Ok(())
    }
}

/// POSTs `{run_id, prompts_processed, mentions_found, brands_mentioned}` as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn run_completed(&self, run_id: i64, metrics: &RunMetrics) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "run_id": run_id,
            "prompts_processed": metrics.prompts_processed,
            "mentions_found": metrics.mentions_found,
            "brands_mentioned": metrics.brands_mentioned,
        });
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Webhook when configured, log otherwise.
pub fn notifier_from_config(config: &NotifyConfig) -> Arc<dyn Notifier> {
    match config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => match WebhookNotifier::new(url) {
            Ok(n) => Arc::new(n),
            Err(e) => {
                tracing::warn!(error = %e, "Webhook notifier unavailable, falling back to log");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    }
}

/// Fire a notification; delivery failures are logged and swallowed.
pub async fn notify_best_effort(notifier: &dyn Notifier, run_id: i64, metrics: &RunMetrics) {
    if let Err(e) = notifier.run_completed(run_id, metrics).await {
        tracing::warn!(run_id, error = %e, "Run notification failed");
    }
}
