//! # Chanwarden: subscription expiry enforcement and scheduled posting
//!
//! Usage:
//!   chanwarden                          # Run the scheduler until Ctrl-C
//!   chanwarden status                   # Show store counts and job cadence
//!   chanwarden sweep-once               # One expiry sweep, then exit
//!   chanwarden publish-once             # One publication run, then exit
//!   chanwarden undo undo_ban:42:100:7   # Reverse a ban from an owner's undo button
//!   chanwarden init                     # Write a default config file
//!   chanwarden --config ./chanwarden.toml --verbose

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chanwarden_channels::TelegramTransport;
use chanwarden_core::ChanwardenConfig;
use chanwarden_scheduler::{CoreJobs, JobScheduler, SqliteStore, UndoBan};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chanwarden",
    version,
    about = "🛡️ Chanwarden: expiry enforcement and scheduled posting for Telegram channels"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (default: ~/.chanwarden/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Run all recurring jobs until interrupted
    Run,
    /// Print store counts and the configured job cadence
    Status,
    /// Run a single expiry sweep and exit
    SweepOnce,
    /// Run a single publication pass and exit
    PublishOnce,
    /// Reverse a ban given its undo reference (the button's callback data)
    Undo {
        /// e.g. undo_ban:42:100:7
        reference: String,
    },
    /// Write a default config file and exit
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default = format!("chanwarden={level},chanwarden_scheduler={level},chanwarden_channels={level}");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<ChanwardenConfig> {
    let config = match path {
        Some(path) => ChanwardenConfig::load_from(path)?,
        None => ChanwardenConfig::load()?,
    };
    Ok(config)
}

fn open_store(config: &ChanwardenConfig) -> Result<Arc<SqliteStore>> {
    let db_path = shellexpand::tilde(&config.database.path).to_string();
    let store = SqliteStore::open(Path::new(&db_path))
        .with_context(|| format!("opening database {db_path}"))?;
    Ok(Arc::new(store))
}

fn build_jobs(config: &ChanwardenConfig, store: Arc<SqliteStore>) -> Result<CoreJobs> {
    let transport = Arc::new(TelegramTransport::new(&config.telegram)?);
    Ok(CoreJobs::new(store, transport, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    if let Some(Command::Init) = cli.command {
        let path = cli.config.unwrap_or_else(ChanwardenConfig::default_path);
        anyhow::ensure!(!path.exists(), "config already exists: {}", path.display());
        ChanwardenConfig::default().save_to(&path)?;
        println!("✅ Wrote {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let command = cli.command.unwrap_or(Command::Run);

    if matches!(command, Command::Status) {
        let store = open_store(&config)?;
        let jobs = build_jobs(&config, store.clone())?;
        let mut scheduler = JobScheduler::new();
        jobs.register(&mut scheduler, &config.scheduler)?;
        let policy = jobs.notifier.policy();
        let report = serde_json::json!({
            "store": store.stats()?,
            "scheduler": scheduler.status(),
            "notifier": {
                "max_per_window": policy.max_per_window,
                "window_secs": policy.window.as_secs(),
                "min_spacing_ms": policy.min_spacing.as_millis() as u64,
            },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    config.validate()?;
    let store = open_store(&config)?;
    let jobs = build_jobs(&config, store)?;

    match command {
        Command::SweepOnce => {
            let report = jobs.lifecycle.sweep(Utc::now()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::PublishOnce => {
            let report = jobs.publication.run(Utc::now()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Undo { reference } => {
            let undo: UndoBan = reference.parse()?;
            if jobs.lifecycle.undo_ban(&undo).await? {
                println!("↩️ Ban undone for user {} in channel {}", undo.user_id, undo.channel_id);
            } else {
                println!("Nothing to undo: subscription is not banned");
            }
        }
        Command::Run | Command::Status | Command::Init => {
            let mut scheduler = JobScheduler::new();
            jobs.register(&mut scheduler, &config.scheduler)?;
            scheduler.start()?;
            tracing::info!("🛡️ Chanwarden running. Press Ctrl-C to stop.");

            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Shutdown requested");
            scheduler.stop();
        }
    }
    Ok(())
}
