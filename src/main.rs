mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use territory_map::config::TerritoryConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "territory", version, about = "Semantic territory maps for short notes")]
struct Cli {
    /// Config file (defaults to ~/.territory/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (transport from config: stdio or http)
    Serve,
    /// Build a territory map from a JSON materials file
    Build {
        /// Materials JSON file, or `-` for stdin
        input: PathBuf,
        /// Write the territory here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Canvas width in pixels
        #[arg(long)]
        width: Option<f64>,
        /// Canvas height in pixels
        #[arg(long)]
        height: Option<f64>,
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
        /// Skip the label service and use keyword labels only
        #[arg(long)]
        no_labels: bool,
    },
    /// Find the cluster owning a canvas point in a saved territory
    Locate {
        /// Territory JSON written by `build`
        territory: PathBuf,
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.territory/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, notices) = match &cli.config {
        Some(path) => TerritoryConfig::load_from(path)?,
        None => TerritoryConfig::load()?,
    };

    // stdout carries MCP JSON-RPC and territory JSON; logs go to stderr.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    for notice in &notices {
        notice.log();
    }

    match cli.command {
        Command::Serve => match config.server.transport.as_str() {
            "http" => server::serve_http(config).await?,
            "stdio" => server::serve_stdio(config).await?,
            other => anyhow::bail!("unknown transport {other:?}, expected \"stdio\" or \"http\""),
        },
        Command::Build {
            input,
            output,
            width,
            height,
            pretty,
            no_labels,
        } => {
            let args = cli::build::BuildArgs {
                input,
                output,
                width,
                height,
                pretty,
                no_labels,
            };
            cli::build::build(&config, args).await?;
        }
        Command::Locate { territory, x, y } => {
            cli::locate::locate(&territory, x, y)?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
