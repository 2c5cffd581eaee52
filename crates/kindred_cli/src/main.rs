use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use kindred_core::{Judge, KindredConfig, Responder, Summarizer};
use kindred_limbic::{AttentionLoop, HeartbeatConfig};
use kindred_memory::CompanionCoordinator;
use kindred_reasoning::OllamaClient;

mod chat;
mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "kindred", author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "kindred.toml", env = "KINDRED_CONFIG")]
    config: PathBuf,

    /// Database path, overriding the config file
    #[arg(long)]
    db: Option<String>,

    /// Also log to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Write the log file as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Directory for the rolling log file
    #[arg(long, env = "KINDRED_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Talk to the companion (default)
    Chat,
    /// Mood, relationship and session overview
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Summarise one day into long-term memory (default: yesterday)
    Consolidate {
        /// Day to consolidate, YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Fade memories nobody recalled lately
    Decay {
        /// Run even if the last run was under the configured interval ago
        #[arg(long)]
        force: bool,
    },
    /// List detected behaviour patterns
    Patterns,
    /// List memories, most important first, or recall by text
    Memories {
        #[arg(short, long)]
        query: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = logging::init(&logging::LogOptions {
        dir: cli.log_dir.clone(),
        verbose: cli.verbose,
        json: cli.log_json,
    })?;

    let mut config = KindredConfig::load_or_default(&cli.config);
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    tracing::info!(
        "Starting Kindred v{} (db {}, model {})",
        env!("CARGO_PKG_VERSION"),
        config.storage.db_path,
        config.llm.model
    );

    let client = Arc::new(OllamaClient::new(&config.llm)?);
    let judge: Arc<dyn Judge> = client.clone();
    let summarizer: Arc<dyn Summarizer> = client.clone();
    let responder: Arc<dyn Responder> = client;

    let attention = Arc::new(AttentionLoop::new(HeartbeatConfig::from_settings(&config.heartbeat)));
    let coordinator = Arc::new(
        CompanionCoordinator::open(config, judge, summarizer)
            .await?
            .with_attention(attention.clone()),
    );

    let result = match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat::run(coordinator.clone(), attention, responder).await,
        Command::Status { json } => commands::status(&coordinator, json).await,
        Command::Consolidate { date } => commands::consolidate(&coordinator, date).await,
        Command::Decay { force } => commands::decay(&coordinator, force).await,
        Command::Patterns => commands::patterns(&coordinator).await,
        Command::Memories { query, limit } => {
            commands::memories(&coordinator, query.as_deref(), limit).await
        }
    };

    coordinator.shutdown().await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}
