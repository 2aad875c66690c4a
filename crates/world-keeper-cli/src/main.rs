mod http;
mod keeper;
mod logging;
mod page;

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use world_keeper_core::archive;
use world_keeper_core::config::Config;
use world_keeper_process::{diagnose, locate, Supervisor};

use crate::http::AppState;
use crate::keeper::{open_store, Keeper};

#[derive(Parser)]
#[command(
    name = "world-keeper",
    version,
    about = "Game server supervisor with world backups"
)]
struct Cli {
    #[arg(long, default_value = "/etc/world-keeper/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the game server and the status page
    Serve,
    /// Show which server executable would be launched
    Locate,
    /// Archive the world directory and store it
    Backup,
    /// List stored backups, newest first
    List,
    /// Save a stored backup as a zip file
    Download {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace the world directory with a stored backup
    Restore { id: String },
    /// List the entries of a stored backup
    Inspect { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Locate => locate_server(&cfg),
        Command::Backup => backup(cfg).await,
        Command::List => list(cfg).await,
        Command::Download { id, out } => download(cfg, &id, out).await,
        Command::Restore { id } => restore(cfg, &id).await,
        Command::Inspect { id } => inspect(cfg, &id).await,
    }
}

fn load_config(path: &str) -> Result<Config> {
    let mut cfg = Config::load(path).with_context(|| format!("config required at {path}"))?;
    cfg.apply_env();
    Ok(cfg)
}

fn keeper(cfg: Config) -> Result<Keeper> {
    let store = open_store(&cfg)?;
    Ok(Keeper::new(Arc::new(cfg), store))
}

async fn serve(cfg: Config) -> Result<()> {
    let supervisor = Supervisor::start(cfg.server.candidates.clone(), cfg.server.working_dir.clone())
        .context("failed to start the server supervisor")?;

    let addr: SocketAddr = format!("{}:{}", cfg.http.bind, cfg.http.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.http.bind, cfg.http.port))?;
    let keeper = keeper(cfg)?;
    info!(store = %keeper.store().describe(), keep = keeper.store().policy().keep, "backup store ready");

    let app = http::router(AppState { keeper, supervisor });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn locate_server(cfg: &Config) -> Result<()> {
    match locate(&cfg.server.candidates) {
        Ok(path) => {
            println!("{}", path.display());
            Ok(())
        }
        Err(err) => {
            diagnose(&cfg.server.candidates);
            Err(err.into())
        }
    }
}

async fn backup(cfg: Config) -> Result<()> {
    let keeper = keeper(cfg)?;
    let outcome = keeper.backup().await?;
    println!("Backup stored: {} ({})", outcome.id, outcome.filename);
    for id in &outcome.pruned {
        println!("Pruned {id}");
    }
    if !outcome.prune_errors.is_empty() {
        return Err(anyhow!(
            "backup stored but pruning failed: {}",
            outcome.prune_errors.join("; ")
        ));
    }
    Ok(())
}

async fn list(cfg: Config) -> Result<()> {
    let keeper = keeper(cfg)?;
    let records = keeper.store().try_list().await?;
    if records.is_empty() {
        println!("No backups stored.");
        return Ok(());
    }
    for record in records {
        println!(
            "{}\t{}\t{}\t{}",
            record.id,
            record.filename,
            record.size_bytes,
            page::timestamp(record.created_at)
        );
    }
    Ok(())
}

async fn download(cfg: Config, id: &str, out: Option<PathBuf>) -> Result<()> {
    let keeper = keeper(cfg)?;
    let record = keeper.store().get(id).await?;
    let dir = out.unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    let path = dir.join(&record.filename);
    fs::write(&path, &record.payload)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Saved {}", path.display());
    Ok(())
}

async fn restore(cfg: Config, id: &str) -> Result<()> {
    let worlds = cfg.paths.worlds.clone();
    let keeper = keeper(cfg)?;
    let restored = keeper.restore(id, None).await?;
    println!(
        "Restored {} into {} ({} files)",
        restored.filename,
        worlds.display(),
        restored.report.files
    );
    Ok(())
}

async fn inspect(cfg: Config, id: &str) -> Result<()> {
    let keeper = keeper(cfg)?;
    let record = keeper.store().get(id).await?;
    for (name, size) in archive::entries(&record.payload)? {
        println!("{name}\t{size}");
    }
    Ok(())
}
