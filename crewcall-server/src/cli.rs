use std::path::PathBuf;

use clap::Parser;

/// CLI for the crewcall server. Flags override values from the config file.
#[derive(Debug, Clone, Default, Parser)]
#[command(about = "Sync-engine backend for event duty rosters")]
pub struct Cli {
    /// Optional YAML config file
    #[arg(long, short, env = "CREWCALL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address for the HTTP API
    #[arg(long, env = "CREWCALL_ADDR")]
    pub listen_addr: Option<String>,

    /// Milliseconds to wait for a request's response before answering with a timeout
    #[arg(long, env = "CREWCALL_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Session options
    // ─────────────────────────────────────────────────────────────────────────

    /// Secret for signing session tokens (HS256).
    /// If not set, a random per-process secret is used.
    #[arg(long, env = "CREWCALL_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Session token lifetime in seconds
    #[arg(long, env = "CREWCALL_SESSION_TTL_SECS")]
    pub session_ttl_secs: Option<u64>,

    /// Also require a valid token on passthrough queries
    #[arg(long, env = "CREWCALL_REQUIRE_TOKEN")]
    pub require_token: Option<bool>,

    // ─────────────────────────────────────────────────────────────────────────
    // Rate limiting options
    // ─────────────────────────────────────────────────────────────────────────

    /// Enable rate limiting of request ingestion
    #[arg(long, env = "CREWCALL_RATE_LIMIT")]
    pub rate_limit: Option<bool>,

    /// Maximum burst size for rate limiting
    #[arg(long, env = "CREWCALL_RATE_BURST")]
    pub rate_burst: Option<u32>,

    /// Sustained requests per second for rate limiting
    #[arg(long, env = "CREWCALL_RATE_PER_SEC")]
    pub rate_per_sec: Option<f64>,
}
