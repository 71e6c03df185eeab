//! plexusd -- boots a plexus process and serves until signalled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use plexus_server::{CircleDirectory, ConnectionManager, Runtime, ServerConfig, TerminateOutcome};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "plexusd",
    about = "Transport-agnostic service-communication server"
)]
struct Args {
    /// JSON configuration file overlaying the built-in defaults.
    #[arg(long, env = "PLEXUS_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `plexus_server=debug`.
    #[arg(long, env = "PLEXUS_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .init();

    let config = load_config(args.config.as_deref())?;
    let runtime = Runtime::new(config);

    let circles = Arc::new(CircleDirectory::new());
    let connection = Arc::new(ConnectionManager::new(
        runtime.config(),
        Arc::clone(&circles),
    ));

    let registry = runtime.registry();
    registry.register(circles)?;
    registry.register(connection)?;

    runtime.init_components().await?;
    info!("plexusd serving; SIGINT or SIGTERM stops it");

    let outcome = runtime.run().await?;
    if outcome == TerminateOutcome::WatchdogFired {
        // Hung stop tasks would otherwise keep the process alive past the
        // watchdog.
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(config)
}
