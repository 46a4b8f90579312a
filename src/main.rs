//! # SendHive — messaging-fleet orchestrator
//!
//! Runs many isolated messaging-account instances (one child process per
//! account) and dispatches queued work against them: bulk sends, fleet
//! health sweeps, recurring schedules.
//!
//! Usage:
//!   sendhive                          # defaults from ~/.sendhive/config.toml
//!   sendhive --base-port 20000        # custom instance port range
//!   sendhive --db-path ./hive.db -v   # local DB, debug logging

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sendhive_channels::{TelegramInstanceClient, WhatsAppInstanceClient};
use sendhive_core::SendHiveConfig;
use sendhive_core::traits::MessageSender;
use sendhive_core::types::Platform;
use sendhive_runtime::{AccountOrchestrator, ProcessRuntime};
use sendhive_scheduler::TaskScheduler;
use sendhive_store::StoreDb;

#[derive(Parser)]
#[command(
    name = "sendhive",
    version,
    about = "🐝 SendHive — orchestrator for fleets of messaging-account instances"
)]
struct Cli {
    /// Database path (default ~/.sendhive/sendhive.db)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Instance data directory (default ~/.sendhive/instances)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to the instance binary launched per account
    #[arg(long)]
    instance_bin: Option<String>,

    /// Base port for instance allocation
    #[arg(long)]
    base_port: Option<u16>,

    /// Config file (default ~/.sendhive/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => SendHiveConfig::load_from(path)?,
        None => SendHiveConfig::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.runtime.data_dir = data_dir;
    }
    if let Some(instance_bin) = cli.instance_bin {
        config.runtime.instance_bin = instance_bin;
    }
    if let Some(base_port) = cli.base_port {
        config.runtime.base_port = base_port;
    }

    let db_path = cli
        .db_path
        .unwrap_or_else(|| SendHiveConfig::home_dir().join("sendhive.db"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(StoreDb::open(&db_path)?);
    tracing::info!("💾 Store open at {}", db_path.display());

    let runtime = Arc::new(ProcessRuntime::new(
        &config.runtime.instance_bin,
        config.runtime.data_dir.clone(),
        config.runtime.base_port,
    ));
    let orchestrator = Arc::new(AccountOrchestrator::new(store.clone(), runtime, &config));

    // the registry cache died with the last process; rebuild from the store
    let readopted = orchestrator.readopt_accounts().await?;
    if readopted > 0 {
        tracing::info!("🔄 Re-adopted {readopted} account instance(s)");
    }

    let mut senders: HashMap<Platform, Arc<dyn MessageSender>> = HashMap::new();
    senders.insert(Platform::Whatsapp, Arc::new(WhatsAppInstanceClient::new()));
    senders.insert(Platform::Telegram, Arc::new(TelegramInstanceClient::new()));

    let scheduler = TaskScheduler::new(
        store.clone(),
        orchestrator.clone(),
        senders,
        config.scheduler.clone(),
    );
    scheduler.start();

    let fleet = orchestrator.health_check().await?;
    tracing::info!(
        "🐝 SendHive up — {} account(s), {} connected. Ctrl-C to stop.",
        fleet.total,
        fleet.connected
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down…");
    scheduler.shutdown().await;
    Ok(())
}
