//! # crewcall CLI
//!
//! Runs the duty-roster backend and inspects its wiring.

mod commands;

use clap::{Parser, Subcommand};
use crewcall_server::cli::Cli as ServeArgs;

#[derive(Parser)]
#[command(name = "crewcall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve(ServeArgs),

    /// Show how each concept operation is routed
    Routes {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the registered sync rules
    Syncs {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Mint a session token for a user
    Token {
        /// User id placed in the token subject
        #[arg(long)]
        user: String,

        /// Signing secret; must match the server's
        #[arg(long, env = "CREWCALL_SESSION_SECRET", hide_env_values = true)]
        secret: String,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => crewcall_server::run_with_cli(args).await,
        Commands::Routes { json } => commands::show_routes(json),
        Commands::Syncs { json } => commands::list_syncs(json),
        Commands::Token {
            user,
            secret,
            ttl_secs,
        } => commands::mint_token(&user, &secret, ttl_secs),
    }
}
