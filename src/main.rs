// src/main.rs
// Context DNA - persistent context storage and retrieval for agent swarms

use clap::Parser;
use context_dna::cli::{Cli, Commands, run_cleanup, run_compact, run_stats};
use context_dna::config::EnvConfig;
use context_dna::error::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Admin output goes to stdout; keep tracing on stderr and quiet unless
    // the command is a sweep.
    let log_level = match &cli.command {
        Commands::Cleanup { .. } => Level::INFO,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load <data_dir>/.env only (never from CWD), before reading config
    let data_dir = context_dna::config::env::resolve_data_dir();
    if let Err(e) = dotenvy::from_path(data_dir.join(".env")) {
        tracing::debug!("no .env loaded: {}", e);
    }

    let config = EnvConfig::load();

    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!("{}", warning);
    }
    if !validation.is_valid() {
        eprintln!("{}", validation.report());
        std::process::exit(1);
    }

    match cli.command {
        Commands::Stats => run_stats(&config).await?,
        Commands::Cleanup { dry_run } => run_cleanup(&config, dry_run).await?,
        Commands::Compact => run_compact(&config).await?,
    }

    Ok(())
}
