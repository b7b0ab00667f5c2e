mod cli;
mod commands;
mod model;
mod retry;
mod shutdown;
mod target;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use memsnap_core::EngineConfig;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("memsnap=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config);

    match cli.command {
        Command::Versions { layouts } => commands::versions::run(&layouts),
        Command::Check { layouts, version } => commands::check::run(&layouts, version.as_deref()),
        Command::Identity { target } => commands::identity::run(&target, config.transport),
        Command::Snapshot {
            layouts,
            target,
            format,
            output,
        } => commands::snapshot::run(&layouts, &target, format, output.as_deref(), config),
        Command::Watch {
            layouts,
            target,
            format,
            interval_ms,
            count,
        } => commands::watch::run(
            &layouts,
            &target,
            format,
            Duration::from_millis(interval_ms),
            count,
            config,
        ),
    }
}

/// Engine settings from `path`; defaults when the file is absent or invalid.
fn load_config(path: &Path) -> EngineConfig {
    match EngineConfig::load(path) {
        Ok(config) => {
            info!("Loaded config from {:?}", path);
            config
        }
        Err(e) if e.is_not_found() => {
            debug!("No config at {:?}, using defaults", path);
            EngineConfig::default()
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            EngineConfig::default()
        }
    }
}
