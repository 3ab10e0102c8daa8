use crate::subsystems::generate::{generation_providers, GenerationSettings, QueryGenerator};
use crate::subsystems::monitor::{answer_provider, openai_backend, serp_client, MonitorEngine, MonitorSettings};
use crate::subsystems::notify::{notifier_from_config, Notifier};
use crate::subsystems::paa::PaaService;
use aivis_core::ipc::{AivisRequest, AivisResponse, RunMode};
use aivis_core::models::RunStatus;
use aivis_core::store::{GenerationStore, MonitorStore};
use aivis_core::{AivisConfig, CircuitBreaker, SentimentDetector};
use sqlx::PgPool;
use std::sync::Arc;

/// Everything a request needs: config, storage and the process-wide state
/// (breaker, PAA cache) shared between requests.
pub struct AppContext {
    pub config: AivisConfig,
    monitor_store: Arc<dyn MonitorStore>,
    generation_store: Arc<dyn GenerationStore>,
    pool: Option<PgPool>,
    notifier: Arc<dyn Notifier>,
    breaker: CircuitBreaker,
    paa: Option<Arc<PaaService>>,
}

impl AppContext {
    /// `pool` is only used for health reporting; all reads and writes go
    /// through `store`.
    pub fn new<S>(config: AivisConfig, store: Arc<S>, pool: Option<PgPool>) -> Self
    where
        S: MonitorStore + GenerationStore + 'static,
    {
        let notifier = notifier_from_config(&config.notify);
        let breaker = CircuitBreaker::in_memory(
            config.generation.breaker_failure_threshold,
            i64::try_from(config.generation.breaker_cooldown_seconds).unwrap_or(i64::MAX),
        );
        let paa = if config.paa.enabled {
            match serp_client(&config) {
                Ok(client) => Some(Arc::new(PaaService::new(client))),
                Err(e) => {
                    tracing::warn!(error = %e, "PAA enrichment disabled");
                    None
                }
            }
        } else {
            None
        };

        Self {
            config,
            monitor_store: store.clone(),
            generation_store: store,
            pool,
            notifier,
            breaker,
            paa,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn monitor_store(&self) -> &Arc<dyn MonitorStore> {
        &self.monitor_store
    }

    /// Engine for one invocation. Fails before touching storage when the
    /// provider has no credentials.
    pub fn monitor_engine(&self, mode: RunMode, max_pages: Option<u32>) -> anyhow::Result<MonitorEngine> {
        let provider = answer_provider(&self.config, mode)?;
        let monitor = &self.config.monitor;
        let sentiment_backend = if monitor.sentiment_ai {
            openai_backend(&self.config).ok()
        } else {
            None
        };
        let sentiment = SentimentDetector::new(
            sentiment_backend,
            monitor.sentiment_window_chars,
            monitor.sentiment_min_chars,
        );
        let mut settings = MonitorSettings::for_mode(monitor, mode);
        if let Some(pages) = max_pages {
            settings.max_pages = pages;
        }
        Ok(MonitorEngine::new(
            self.monitor_store.clone(),
            provider,
            sentiment,
            self.notifier.clone(),
            settings,
        ))
    }

    pub fn query_generator(&self) -> QueryGenerator {
        QueryGenerator::new(
            self.generation_store.clone(),
            generation_providers(&self.config),
            self.breaker.clone(),
            self.paa.clone(),
            GenerationSettings::from_config(&self.config.generation, &self.config.paa),
        )
    }
}

pub async fn handle_request(request: AivisRequest, ctx: &AppContext) -> AivisResponse {
    match request {
        AivisRequest::Ping => AivisResponse::pong(),
        AivisRequest::Health => match &ctx.pool {
            Some(pool) => match aivis_core::db::health_check(pool).await {
                Ok(v) => AivisResponse::ok(serde_json::json!({
                    "postgresql": v,
                    "status": "healthy"
                })),
                Err(e) => AivisResponse::err(format!("DB Health Check failed: {}", e)),
            },
            None => AivisResponse::ok(serde_json::json!({
                "store": "memory",
                "status": "healthy"
            })),
        },
        AivisRequest::RunMonitoring {
            mode,
            offset,
            run_id,
            max_pages,
        } => {
            let engine = match ctx.monitor_engine(mode, max_pages) {
                Ok(e) => e,
                Err(e) => return AivisResponse::err(format!("{e:#}")),
            };
            match engine.run_monitoring(offset, run_id).await {
                Ok(result) => to_response(&result),
                Err(e) => AivisResponse::err(format!("{e:#}")),
            }
        }
        AivisRequest::StopRun { run_id } => {
            match ctx.monitor_store.get_run(run_id).await {
                Ok(Some(_)) => {}
                Ok(None) => return AivisResponse::err(format!("run {run_id} not found")),
                Err(e) => return AivisResponse::err(e.to_string()),
            }
            match ctx.monitor_store.finish_run(run_id, RunStatus::Stopped, None).await {
                Ok(stopped) => {
                    tracing::info!(run_id, stopped, "Stop requested");
                    AivisResponse::ok(serde_json::json!({"run_id": run_id, "stopped": stopped}))
                }
                Err(e) => AivisResponse::err(e.to_string()),
            }
        }
        AivisRequest::RunStatus { run_id } => match run_status(ctx, run_id).await {
            Ok(data) => AivisResponse::ok(data),
            Err(e) => AivisResponse::err(format!("{e:#}")),
        },
        AivisRequest::ListRuns { limit } => {
            let limit = limit.unwrap_or(20).clamp(1, 200);
            match ctx.monitor_store.list_runs(limit).await {
                Ok(runs) => AivisResponse::ok(serde_json::json!({"count": runs.len(), "runs": runs})),
                Err(e) => AivisResponse::err(e.to_string()),
            }
        }
        AivisRequest::GenerateTopic { topic_id, force } => {
            match ctx.query_generator().generate_topic(topic_id, force).await {
                Ok(summary) => to_response(&summary),
                Err(e) => AivisResponse::err(format!("{e:#}")),
            }
        }
        AivisRequest::ProcessTopicPersonas { topic_id, start } => {
            let generator = ctx.query_generator();
            let mut gen_ctx = generator.new_context();
            match generator.process_topic_personas(topic_id, start, &mut gen_ctx).await {
                Ok(batch) => to_response(&batch),
                Err(e) => AivisResponse::err(format!("{e:#}")),
            }
        }
    }
}

async fn run_status(ctx: &AppContext, run_id: i64) -> anyhow::Result<serde_json::Value> {
    let run = ctx
        .monitor_store
        .get_run(run_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
    let metrics = ctx.monitor_store.run_metrics(run_id).await?;
    Ok(serde_json::json!({"run": run, "metrics": metrics}))
}

fn to_response<T: serde::Serialize>(value: &T) -> AivisResponse {
    match serde_json::to_value(value) {
        Ok(data) => AivisResponse::ok(data),
        Err(e) => AivisResponse::err(format!("Serialization error: {}", e)),
    }
}
