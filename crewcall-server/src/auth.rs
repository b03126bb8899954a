//! Sessions and the authorization gate.
//!
//! [`JwtSessionStore`] keeps accounts in memory with salted blake3 password
//! digests and issues HS256 session tokens carrying a `jti`. Logout adds the
//! `jti` to a revocation set, so a token stops validating before it expires.
//! Entries leave the set once their token would fail the expiry check anyway.
//!
//! The gate itself is two where-filters used by the sync catalogue:
//! [`Authorized`] lets a gated route's request rule fire only with a valid
//! token, and [`Unauthorized`] picks out requests to gated routes that lack
//! one so they can be answered with `Unauthorized`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use crewcall_concepts::UserExistenceGuard;
use crewcall_sync::{EnrichContext, Frame, FrameFilter, Session, SessionError, SessionStore};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::passthrough::PassthroughTable;

/// Session token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    /// Token id, the unit of revocation
    pub jti: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,
}

struct Account {
    user: String,
    salt: [u8; 16],
    digest: blake3::Hash,
}

fn digest(salt: &[u8], password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize()
}

/// Clock skew tolerated when checking `exp`
const LEEWAY_SECS: u64 = 60;

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

pub struct JwtSessionStore {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    accounts: RwLock<HashMap<String, Account>>,
    /// Revoked `jti` -> its token's `exp`
    revoked: RwLock<HashMap<String, u64>>,
}

impl JwtSessionStore {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            accounts: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashMap::new()),
        }
    }

    /// A store signing with a random secret; its tokens die with the process
    pub fn ephemeral(ttl: Duration) -> Self {
        let mut secret = Uuid::new_v4().as_bytes().to_vec();
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        Self::new(&secret, ttl)
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        match &config.secret {
            Some(secret) => Self::new(secret.as_bytes(), config.ttl),
            None => {
                info!("no session secret configured; using an ephemeral one");
                Self::ephemeral(config.ttl)
            }
        }
    }

    /// Mint a token for `user` without checking credentials
    pub fn issue(&self, user: &str) -> Result<String, SessionError> {
        let iat = now_secs();
        let claims = Claims {
            sub: user.to_string(),
            iat,
            exp: iat + self.ttl.as_secs(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionError::Internal(format!("failed to encode token: {e}")))
    }

    /// Check signature, expiry and revocation
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        if self.revoked.read().contains_key(&data.claims.jti) {
            return Err(AuthError::Revoked);
        }
        Ok(data.claims)
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.accounts.read().values().any(|a| a.user == user)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.read().len()
    }

    /// Drop revocations whose tokens are past expiry; returns how many
    pub fn prune_revoked(&self) -> usize {
        let now = now_secs();
        let mut revoked = self.revoked.write();
        let before = revoked.len();
        revoked.retain(|_, exp| exp.saturating_add(LEEWAY_SECS) >= now);
        before - revoked.len()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }
}

#[async_trait]
impl SessionStore for JwtSessionStore {
    async fn create_account(&self, email: &str, password: &str) -> Result<String, SessionError> {
        let key = email.trim().to_lowercase();
        if key.is_empty() || password.is_empty() {
            return Err(SessionError::Invalid(
                "email and pw must be non-empty".to_string(),
            ));
        }
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&key) {
            return Err(SessionError::UserExists);
        }
        let salt = Uuid::new_v4().into_bytes();
        accounts.insert(
            key.clone(),
            Account {
                user: key.clone(),
                salt,
                digest: digest(&salt, password),
            },
        );
        info!(user = %key, "account created");
        Ok(key)
    }

    async fn login(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let key = email.trim().to_lowercase();
        let user = {
            let accounts = self.accounts.read();
            let account = accounts.get(&key).ok_or(SessionError::LoginFailed)?;
            // blake3::Hash equality is constant-time
            if digest(&account.salt, password) != account.digest {
                return Err(SessionError::LoginFailed);
            }
            account.user.clone()
        };
        let token = self.issue(&user)?;
        debug!(%user, "session issued");
        Ok(Session { token, user })
    }

    async fn validate(&self, token: &str) -> Option<String> {
        match self.verify(token) {
            Ok(claims) => Some(claims.sub),
            Err(error) => {
                debug!(%error, "token rejected");
                None
            }
        }
    }

    async fn revoke(&self, token: &str) -> bool {
        match self.verify(token) {
            Ok(claims) => {
                let pruned = self.prune_revoked();
                if pruned > 0 {
                    debug!(pruned, "expired revocations dropped");
                }
                self.revoked.write().insert(claims.jti, claims.exp).is_none()
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl UserExistenceGuard for JwtSessionStore {
    async fn user_exists(&self, user: &str) -> bool {
        self.has_user(user)
    }
}

/// Bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn token_is_valid(frame: &Frame, cx: &EnrichContext<'_>) -> bool {
    match frame.get_str("token") {
        Some(token) => cx.sessions.validate(token).await.is_some(),
        None => false,
    }
}

/// Keeps frames whose `token` variable is a valid session token
pub struct Authorized;

#[async_trait]
impl FrameFilter for Authorized {
    fn name(&self) -> &str {
        "Authorized"
    }

    async fn keep(&self, frame: &Frame, cx: &EnrichContext<'_>) -> bool {
        token_is_valid(frame, cx).await
    }
}

/// Keeps frames whose `path` is gated and whose `token` does not validate
pub struct Unauthorized {
    table: Arc<PassthroughTable>,
}

impl Unauthorized {
    pub fn new(table: Arc<PassthroughTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl FrameFilter for Unauthorized {
    fn name(&self) -> &str {
        "Unauthorized"
    }

    async fn keep(&self, frame: &Frame, cx: &EnrichContext<'_>) -> bool {
        let gated = frame
            .get_str("path")
            .is_some_and(|path| self.table.is_excluded(path));
        gated && !token_is_valid(frame, cx).await
    }
}
