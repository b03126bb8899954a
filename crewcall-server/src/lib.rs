//! Library entrypoint for crewcall-server so other binaries (the crewcall
//! CLI) can reuse the server without shelling out.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod passthrough;
pub mod ratelimit;
pub mod server;
pub mod syncs;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub use app::App;
pub use config::ServerConfig;

/// Install the global subscriber; `RUST_LOG` wins over `verbose`
pub fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Run the server using CLI args (parsed by the caller).
pub async fn run_with_cli(cli: cli::Cli) -> Result<()> {
    init_tracing(cli.verbose)?;
    let config = ServerConfig::from_cli(&cli)?;
    server::serve(config).await
}
