//! aivis-cli: drive a running aivis-server over its HTTP API.
//!
//! # Subcommands
//! - `run [--mode chat|aio] [--max-pages N] [--follow] [--json]`  start a monitoring run
//! - `stop <run_id>`                                              stop a running run
//! - `runs [-n <limit>]`                                          recent runs
//! - `status [run_id]`                                            server health, or one run
//! - `generate <topic_id> [--force]`                              generate queries for a topic

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8766";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "aivis-cli", version, about = "AI-visibility monitoring client")]
struct Cli {
    /// aivis HTTP server URL (overrides AIVIS_HTTP_URL env var)
    #[arg(long, env = "AIVIS_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a monitoring run
    Run {
        /// Answer provider: chat or aio
        #[arg(long, default_value = "chat")]
        mode: String,

        /// Stop after this many prompt pages per request
        #[arg(long)]
        max_pages: Option<u32>,

        /// Keep continuing the run until it is done
        #[arg(long)]
        follow: bool,

        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },

    /// Stop a running run
    Stop { run_id: i64 },

    /// List recent runs
    Runs {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: i64,
    },

    /// Show server health, or one run's status and metrics
    Status { run_id: Option<i64> },

    /// Generate candidate queries for every persona of a topic
    Generate {
        topic_id: i64,

        /// Ignore the regeneration cooldown
        #[arg(long)]
        force: bool,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PromptError {
    pub prompt_id: i64,
    pub error: String,
}

/// Body of POST /runs
#[derive(Debug, Deserialize)]
pub struct RunResult {
    pub run_id: i64,
    pub model: String,
    pub processed: usize,
    #[serde(default)]
    pub errors: Vec<PromptError>,
    pub done: bool,
    pub next_offset: i64,
    pub took_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TopicGeneration {
    pub topic_id: i64,
    pub processed_personas: usize,
    pub generated: usize,
    pub completed: bool,
    pub cooldown_remaining_secs: Option<i64>,
}

/// Request body that continues `previous`, or `None` when it is done.
pub fn continuation_body(mode: &str, max_pages: Option<u32>, previous: &RunResult) -> Option<serde_json::Value> {
    if previous.done {
        return None;
    }
    Some(serde_json::json!({
        "mode": mode,
        "run_id": previous.run_id,
        "offset": previous.next_offset,
        "max_pages": max_pages,
    }))
}

pub fn format_run(result: &RunResult) -> String {
    let mut out = format!(
        "run {} ({}) processed {} prompt(s), {} error(s){}",
        result.run_id,
        result.model,
        result.processed,
        result.errors.len(),
        if result.done { ", done" } else { "" }
    );
    if let Some(ms) = result.took_ms {
        out.push_str(&format!(" in {}ms", ms));
    }
    for e in result.errors.iter().take(10) {
        out.push_str(&format!("\n  prompt {}: {}", e.prompt_id, e.error));
    }
    if result.errors.len() > 10 {
        out.push_str(&format!("\n  ... {} more", result.errors.len() - 10));
    }
    out
}

pub fn format_generation(summary: &TopicGeneration) -> String {
    if let Some(secs) = summary.cooldown_remaining_secs {
        return format!(
            "topic {} is cooling down ({}s left); use --force to regenerate",
            summary.topic_id, secs
        );
    }
    format!(
        "topic {}: {} persona(s), {} new suggestion(s){}",
        summary.topic_id,
        summary.processed_personas,
        summary.generated,
        if summary.completed { "" } else { " (incomplete)" }
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request and return the JSON body, exiting on transport or HTTP errors.
fn call(request: reqwest::blocking::RequestBuilder, url: &str) -> anyhow::Result<serde_json::Value> {
    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("aivis-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    let status = resp.status();
    // 429 carries a cooldown summary worth printing.
    if !status.is_success() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
        let body = resp.text().unwrap_or_default();
        eprintln!("aivis-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }
    Ok(resp.json()?)
}

fn do_run(server: &str, mode: &str, max_pages: Option<u32>, follow: bool, json: bool) -> anyhow::Result<()> {
    // Runs page through the whole prompt list inside one request.
    let client = client(60 * 60)?;
    let url = format!("{}/runs", server);
    let mut body = serde_json::json!({"mode": mode, "max_pages": max_pages});

    loop {
        let value = call(client.post(&url).json(&body), &url)?;
        let result: RunResult = serde_json::from_value(value.clone())?;
        if json {
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            println!("{}", format_run(&result));
        }
        match continuation_body(mode, max_pages, &result) {
            Some(next) if follow => body = next,
            Some(_) => {
                println!(
                    "continue with: aivis-cli run --mode {} (run {} at offset {})",
                    mode, result.run_id, result.next_offset
                );
                return Ok(());
            }
            None => return Ok(()),
        }
    }
}

fn do_stop(server: &str, run_id: i64) -> anyhow::Result<()> {
    let url = format!("{}/runs/{}/stop", server, run_id);
    let body = call(client(30)?.post(&url), &url)?;
    if body["stopped"].as_bool().unwrap_or(false) {
        println!("run {} stopped", run_id);
    } else {
        println!("run {} was not running", run_id);
    }
    Ok(())
}

fn do_runs(server: &str, limit: i64) -> anyhow::Result<()> {
    let url = format!("{}/runs?limit={}", server, limit);
    let body = call(client(30)?.get(&url), &url)?;
    let runs = body["runs"].as_array().cloned().unwrap_or_default();
    if runs.is_empty() {
        eprintln!("No runs yet");
        return Ok(());
    }
    for run in &runs {
        println!(
            "{:>6}  {:<10} {:<24} {}",
            run["id"],
            run["status"].as_str().unwrap_or("?"),
            run["model"].as_str().unwrap_or("?"),
            run["started_at"].as_str().unwrap_or("?"),
        );
    }
    Ok(())
}

fn do_status(server: &str, run_id: Option<i64>) -> anyhow::Result<()> {
    let client = client(10)?;
    match run_id {
        Some(id) => {
            let url = format!("{}/runs/{}", server, id);
            let body = call(client.get(&url), &url)?;
            let run = &body["run"];
            let metrics = &body["metrics"];
            println!("Run:        {}", id);
            println!("Status:     {}", run["status"].as_str().unwrap_or("?"));
            println!("Model:      {}", run["model"].as_str().unwrap_or("?"));
            println!("Prompts:    {}", metrics["prompts_processed"]);
            println!("Mentions:   {}", metrics["mentions_found"]);
            println!("Brands:     {}", metrics["brands_mentioned"]);
            if let Some(err) = run["error"].as_str() {
                println!("Error:      {}", err);
            }
        }
        None => {
            let url = format!("{}/health", server);
            let body = call(client.get(&url), &url)?;
            println!("aivis server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:   {}", body["postgresql"].as_str().unwrap_or("?"));
            println!("Socket:       {}", body["socket"].as_str().unwrap_or("?"));
        }
    }
    Ok(())
}

fn do_generate(server: &str, topic_id: i64, force: bool) -> anyhow::Result<()> {
    let url = format!("{}/topics/{}/generate", server, topic_id);
    let value = call(client(60 * 30)?.post(&url).json(&serde_json::json!({"force": force})), &url)?;
    let summary: TopicGeneration = serde_json::from_value(value)?;
    println!("{}", format_generation(&summary));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Run {
            mode,
            max_pages,
            follow,
            json,
        } => do_run(&server, &mode, max_pages, follow, json),
        Commands::Stop { run_id } => do_stop(&server, run_id),
        Commands::Runs { limit } => do_runs(&server, limit),
        Commands::Status { run_id } => do_status(&server, run_id),
        Commands::Generate { topic_id, force } => do_generate(&server, topic_id, force),
    };

    if let Err(e) = result {
        eprintln!("aivis-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn run_result(done: bool, errors: usize) -> RunResult {
        RunResult {
            run_id: 7,
            model: "gpt-4o-mini".to_string(),
            processed: 3,
            errors: (0..errors)
                .map(|i| PromptError {
                    prompt_id: i as i64,
                    error: "timeout".to_string(),
                })
                .collect(),
            done,
            next_offset: 200,
            took_ms: Some(1500),
        }
    }

    // ========================================================================
    // TEST 1: finished runs need no continuation
    // ========================================================================
    #[test]
    fn test_no_continuation_when_done() {
        assert!(continuation_body("chat", None, &run_result(true, 0)).is_none());
    }

    // ========================================================================
    // TEST 2: continuation carries run id and offset
    // ========================================================================
    #[test]
    fn test_continuation_body() {
        let body = continuation_body("aio", Some(2), &run_result(false, 0)).unwrap();
        assert_eq!(body["run_id"], 7);
        assert_eq!(body["offset"], 200);
        assert_eq!(body["mode"], "aio");
        assert_eq!(body["max_pages"], 2);
    }

    // ========================================================================
    // TEST 3: run summary lists errors and truncates long lists
    // ========================================================================
    #[test]
    fn test_format_run_truncates_errors() {
        let text = format_run(&run_result(true, 12));
        assert!(text.starts_with("run 7 (gpt-4o-mini) processed 3 prompt(s), 12 error(s), done in 1500ms"));
        assert_eq!(text.matches("prompt ").count(), 10);
        assert!(text.ends_with("... 2 more"));
    }

    // ========================================================================
    // TEST 4: RunResult parses the server body
    // ========================================================================
    #[test]
    fn test_run_result_deserializes() {
        let body = serde_json::json!({
            "run_id": 1, "model": "google-ai-overview", "processed": 0,
            "errors": [], "prompt_ids": [], "done": true, "next_offset": 0
        });
        let result: RunResult = serde_json::from_value(body).unwrap();
        assert!(result.done);
        assert!(result.took_ms.is_none());
    }

    // ========================================================================
    // TEST 5: cooldown summary mentions --force
    // ========================================================================
    #[test]
    fn test_format_generation_cooldown() {
        let summary = TopicGeneration {
            topic_id: 3,
            processed_personas: 0,
            generated: 0,
            completed: false,
            cooldown_remaining_secs: Some(420),
        };
        let text = format_generation(&summary);
        assert!(text.contains("420s"));
        assert!(text.contains("--force"));
    }
}
