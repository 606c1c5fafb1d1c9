//! wsrpc CLI - run and inspect a wsrpc gateway.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use wsrpc_core::{Config, LogFormat};

#[derive(Parser)]
#[command(name = "wsrpc")]
#[command(about = "wsrpc - bidirectional JSON-RPC over WebSocket")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.wsrpc/wsrpc.json)
    #[arg(long, global = true, env = "WSRPC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    Ok(config.with_env_overrides())
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            let args = commands::serve::ServeArgs { config, port, bind };
            commands::run_serve(args).await?;
        }

        Commands::Config => {
            let args = commands::config::ConfigArgs {
                config,
                path: cli.config.unwrap_or_else(Config::default_path),
            };
            commands::run_config(&args)?;
        }
    }

    Ok(())
}
