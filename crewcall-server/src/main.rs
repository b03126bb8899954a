//! crewcall-server: HTTP front for the crewcall sync engine.

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    crewcall_server::run_with_cli(crewcall_server::cli::Cli::parse()).await
}
