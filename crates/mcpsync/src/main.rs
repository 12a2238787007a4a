//! # mcpsync
//!
//! Binary for the context sync server: runs the WebSocket server, mints
//! development tokens and manages the long-term memory store.

#![deny(unsafe_code)]

mod memory;
mod serve;
mod token;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcpsync_core::init_subscriber;
use mcpsync_core::logging::LogFormat;
use mcpsync_settings::{SyncSettings, load_settings, load_settings_from_path};

/// Real-time context synchronization server.
#[derive(Parser, Debug)]
#[command(name = "mcpsync", version, about = "Real-time context synchronization server")]
struct Cli {
    /// Settings file (defaults to `~/.mcpsync/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `mcpsync_server=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket server (default).
    Serve(serve::ServeArgs),
    /// Sign a development token with the configured secret.
    Token(token::TokenArgs),
    /// Inspect and edit the long-term memory store.
    Memory {
        #[command(subcommand)]
        command: memory::MemoryCommand,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<SyncSettings> {
        let mut settings = match &self.config {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => load_settings().context("failed to load settings")?,
        };
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_subscriber(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    match cli.command {
        None => serve::run(settings, serve::ServeArgs::default()).await,
        Some(Command::Serve(args)) => serve::run(settings, args).await,
        Some(Command::Token(args)) => token::run(&settings, &args),
        Some(Command::Memory { command }) => memory::run(&settings, command),
    }
}
