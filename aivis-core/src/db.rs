use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Count prompts currently eligible for monitoring.
pub async fn count_monitorable_prompts(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*)::bigint FROM prompts
         WHERE deleted_at IS NULL
           AND status IN ('approved', 'active')
           AND (is_paused = false OR is_paused IS NULL)",
    )
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}
