//! Cirrus command-line client entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Chunked, end-to-end encrypted file transfers against a local backend.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (defaults to ~/.config/cirrus/cli.toml)
    #[arg(long, env = "CIRRUS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload one or more files
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Destination folder (defaults to `default_folder` from the config)
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Download a file by id
    Download {
        /// File id as shown by `list`
        id: String,

        /// Output path (defaults to the file name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List uploaded files
    List {
        /// Only show files in this folder
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// List files downloaded on this machine
    Offline,

    /// Delete chunks left behind by cancelled or failed uploads
    ///
    /// Uploads still running in another process look the same, so only
    /// uploads untouched for `--min-age-secs` are deleted.
    Prune {
        /// Minimum age of an unfinalized upload, in seconds
        #[arg(long, default_value_t = 86_400)]
        min_age_secs: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cirrus=debug")),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let config = config::Config::load(&config_path)?;
    tracing::debug!(
        path = %config_path.display(),
        backend = %config.backend_path().display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, args.command))
}
