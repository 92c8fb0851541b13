mod bot;
mod config;
mod domain;
mod exchanges;
mod notification;
mod planner;
mod storage;
mod strategy;

use std::env;
use std::sync::Arc;

use bot::{Bot, BotOptions};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

fn parse_config_path() -> String {
    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

fn init_tracing(log_level: Option<&str>) {
    let level = match log_level {
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") | Some("warning") => Level::WARN,
        Some("error") => Level::ERROR,
        Some("trace") => Level::TRACE,
        _ => Level::INFO,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing early so we can see logs from bot initialization
    init_tracing(Some("info"));

    let config_path = parse_config_path();
    let dry_run = env::args().any(|arg| arg == "--dry-run");

    let options = BotOptions {
        dry_run,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let bot = match Bot::from_config_path(&config_path, options).await {
        Ok(bot) => Arc::new(bot),
        Err(e) => {
            eprintln!("Failed to create bot: {}", e);
            return;
        }
    };

    info!(config = %config_path, dry_run = dry_run, "bot initialized");

    let runner = Arc::clone(&bot);
    let handle = tokio::spawn(async move {
        if let Err(e) = runner.start().await {
            error!(error = %e, "bot error");
        }
    });

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }

    if let Err(e) = bot.stop().await {
        error!(error = %e, "shutdown error");
    }
    let _ = handle.await;
}
