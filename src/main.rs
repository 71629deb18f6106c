use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use streamledger::config::{Config, ValidationMode};
use streamledger::pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "streamledger",
    about = "Curate IPTV playlists and build a matching XMLTV guide"
)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "config/streamledger.toml")]
    config: PathBuf,

    /// Stream validation mode (overrides VALIDATION_MODE and the config file)
    #[arg(long, value_enum, value_name = "MODE")]
    validation_mode: Option<ValidationMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Fetch, validate and filter playlist sources into curated.m3u
    Playlist,
    /// Build curated_epg.xml.gz for the channels in curated.m3u
    Epg,
    /// Run the playlist stage, then the guide stage
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let env_mode = std::env::var("VALIDATION_MODE").ok();
    let mode = ValidationMode::resolve(
        args.validation_mode,
        env_mode.as_deref(),
        config.validation.mode,
    );
    tracing::info!(mode = mode.as_str(), command = ?args.command, "Starting");

    let pipeline = Pipeline::new(config, mode);
    match args.command {
        Command::Playlist => {
            let summary = pipeline.run_playlist().await.context("Playlist stage failed")?;
            println!(
                "Wrote {} channels to {}",
                summary.curated,
                summary.path.display()
            );
        }
        Command::Epg => {
            let summary = pipeline.run_epg().await.context("Guide stage failed")?;
            println!(
                "Wrote guide for {} channels to {} (coverage {:.2})",
                summary.matched,
                summary.path.display(),
                summary.coverage
            );
        }
        Command::Run => {
            let (playlist, guide) = pipeline.run_all().await.context("Pipeline failed")?;
            println!(
                "Wrote {} channels to {}",
                playlist.curated,
                playlist.path.display()
            );
            println!(
                "Wrote guide for {} channels to {} (coverage {:.2})",
                guide.matched,
                guide.path.display(),
                guide.coverage
            );
        }
    }

    Ok(())
}
