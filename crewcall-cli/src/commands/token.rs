//! Mint a session token offline, signed with the server's secret.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use crewcall_server::auth::JwtSessionStore;

pub fn mint_token(user: &str, secret: &str, ttl_secs: u64) -> Result<()> {
    if secret.is_empty() {
        bail!("secret must not be empty");
    }
    if ttl_secs == 0 {
        bail!("ttl-secs must be positive");
    }
    let store = JwtSessionStore::new(secret.as_bytes(), Duration::from_secs(ttl_secs));
    let token = store.issue(user).context("Failed to sign token")?;
    println!("{}", token);
    Ok(())
}
