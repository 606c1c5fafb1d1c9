//! Config command.

use std::path::PathBuf;

use anyhow::Result;
use wsrpc_core::Config;

use crate::ui;

/// Config command arguments.
#[derive(Debug, Clone)]
pub struct ConfigArgs {
    /// Effective configuration (file plus environment overrides).
    pub config: Config,
    /// File the configuration was read from.
    pub path: PathBuf,
}

/// Run the config command.
pub fn run_config(args: &ConfigArgs) -> Result<()> {
    ui::header("wsrpc configuration");
    if args.path.exists() {
        ui::kv("File", &args.path.display().to_string());
    } else {
        ui::kv("File", &format!("{} (not found, using defaults)", args.path.display()));
    }

    match args.config.validate() {
        Ok(()) => ui::success("Configuration is valid"),
        Err(e) => ui::error(&e.to_string()),
    }

    println!("{}", render(&args.config)?);
    Ok(())
}

fn render(config: &Config) -> Result<String> {
    Ok(serde_json::to_string_pretty(config)?)
}
