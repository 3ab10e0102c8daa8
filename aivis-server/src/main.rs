use aivis_core::{AivisConfig, PgStore};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use aivis_server::router::AppContext;
use aivis_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "aivis.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is a dev convenience; production sets real env vars
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match AivisConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let pool = match aivis_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match aivis_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match aivis_core::db::count_monitorable_prompts(&pool).await {
            Ok(n) => println!("✅ Monitorable prompts: {}", n),
            Err(e) => {
                println!("❌ Prompt table check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ aivis DB health check passed");
        return Ok(());
    }

    let store = Arc::new(PgStore::new(pool.clone()));
    let ctx = Arc::new(AppContext::new(config.clone(), store, Some(pool)));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.schedule.enabled {
        let schedule_ctx = ctx.clone();
        let schedule_config = config.schedule.clone();
        let schedule_shutdown = tx.subscribe();
        tokio::spawn(async move {
            aivis_server::subsystems::scheduler::run_schedule_loop(schedule_ctx, schedule_config, schedule_shutdown)
                .await;
        });
    }

    if config.http.enabled {
        let http_ctx = ctx.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = aivis_server::http::start_http_server(http_ctx, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    server::run_unix_server(&config.service.socket_path, ctx, tx.subscribe()).await?;

    Ok(())
}
