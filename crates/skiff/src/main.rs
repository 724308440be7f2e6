mod commands;
mod progress;
mod provision;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(version, about = "Ephemeral cloud test environments for CI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the environment described by the spec file
    Create {
        /// Environment spec file
        #[arg(short, long, env = "SKIFF_CONFIG", default_value = "skiff.yaml")]
        config: PathBuf,
        /// Cache file path (defaults to .skiff/<name>.yaml)
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Script to run on the host over SSH once it is reachable
        #[arg(long)]
        post_script: Option<PathBuf>,
        /// Skip SSH readiness and provisioning after create
        #[arg(long)]
        no_provision: bool,
    },
    /// Delete the environment recorded in the cache file
    Delete {
        /// Environment spec file (used when no cache file exists yet)
        #[arg(short, long, env = "SKIFF_CONFIG", default_value = "skiff.yaml")]
        config: PathBuf,
        /// Cache file path (defaults to .skiff/<name>.yaml)
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Show the environment's conditions and resource ids
    Status {
        #[arg(short, long, env = "SKIFF_CONFIG", default_value = "skiff.yaml")]
        config: PathBuf,
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Print the raw status document as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate instance type and image availability without creating resources
    DryRun {
        #[arg(short, long, env = "SKIFF_CONFIG", default_value = "skiff.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Create {
            config,
            cache,
            post_script,
            no_provision,
        } => commands::create::handle(config, cache, post_script, no_provision).await,
        Commands::Delete { config, cache } => commands::delete::handle(config, cache).await,
        Commands::Status {
            config,
            cache,
            json,
        } => commands::status::handle(config, cache, json).await,
        Commands::DryRun { config } => commands::dry_run::handle(config).await,
    }
}
