//! TagVault CLI - apply content-update packages and inspect a library.
//!
//! Output is JSON on stdout; logs go to stderr.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::Command;
use std::path::PathBuf;
use tagvault_core::TagVault;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tagvault")]
#[command(about = "Maintain a TagVault media library")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Library root directory (defaults to the platform data directory)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let root = match args.root {
        Some(path) => path,
        None => dirs::data_dir()
            .context("No platform data directory; pass --root")?
            .join("tagvault"),
    };
    info!("Library root: {}", root.display());

    let vault = TagVault::builder(&root)
        .auto_create_dirs(matches!(args.command, Command::Init))
        .build()
        .await
        .with_context(|| format!("Failed to open library at {}", root.display()))?;

    let outcome = commands::run(&vault, args.command).await;
    vault.shutdown().await?;

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
