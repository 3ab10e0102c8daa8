//! Periodic monitoring runs.

use crate::router::AppContext;
use crate::subsystems::monitor::RunResult;
use aivis_core::config::ScheduleConfig;
use aivis_core::RunMode;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Drive one run to completion, continuing it page by page when the engine
/// hands back `done = false`.
pub async fn run_to_completion(ctx: &AppContext, mode: RunMode) -> anyhow::Result<RunResult> {
    let engine = ctx.monitor_engine(mode, None)?;
    let mut result = engine.run_monitoring(0, None).await?;
    let mut processed = result.processed;
    let mut errors = std::mem::take(&mut result.errors);
    let mut prompt_ids = std::mem::take(&mut result.prompt_ids);

    while !result.done {
        result = engine.run_monitoring(result.next_offset, Some(result.run_id)).await?;
        processed += result.processed;
        errors.append(&mut result.errors);
        prompt_ids.append(&mut result.prompt_ids);
    }

    result.processed = processed;
    result.errors = errors;
    result.prompt_ids = prompt_ids;
    Ok(result)
}

/// Called from main.rs when `[schedule] enabled = true`.
pub async fn run_schedule_loop(
    ctx: Arc<AppContext>,
    config: ScheduleConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mode = match RunMode::parse(&config.mode) {
        Some(m) => m,
        None => {
            tracing::error!(mode = %config.mode, "Unknown schedule mode, scheduler not started");
            return;
        }
    };
    let interval = tokio::time::Duration::from_secs(config.interval_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Monitoring scheduler started (interval: {}min, mode: {})",
        config.interval_minutes,
        mode.as_str()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_to_completion(&ctx, mode).await {
                    Ok(result) => tracing::info!(
                        run_id = result.run_id,
                        processed = result.processed,
                        errors = result.errors.len(),
                        "Scheduled run finished"
                    ),
                    Err(e) => tracing::error!("Scheduled run error: {:#}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Monitoring scheduler shutting down");
                break;
            }
        }
    }
}
