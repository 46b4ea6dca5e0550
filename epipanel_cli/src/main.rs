mod cli;
mod display;
mod error;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, RunCommand};
use epipanel::config::Config;
use log::debug;

const DEFAULT_LOGGING_LEVEL: &str = "warn";

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    let _ =
        std::env::var("RUST_LOG").map_err(|_| std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL));
    pretty_env_logger::init_timed();
    let args = Cli::parse();
    debug!("args: {args:?}");
    let config = read_config_from_toml()?;
    debug!("config: {config:?}");

    if let Some(command) = args.command {
        command.run(config).await?;
    }
    Ok(())
}

fn read_config_from_toml() -> Result<Config> {
    // macOS: ~/Library/Application Support/epipanel/config.toml
    let file_path = dirs::config_dir()
        .context("No configuration directory on this platform")?
        .join("epipanel")
        .join("config.toml");
    read_config(&file_path)
}

/// A missing file means the default configuration; an unreadable or invalid one is an error.
fn read_config(file_path: &Path) -> Result<Config> {
    match std::fs::read_to_string(file_path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("Invalid TOML in config file {}", file_path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e).with_context(|| format!("Error reading config file {}", file_path.display())),
    }
}
