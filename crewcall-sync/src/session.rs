//! Session store interface
//!
//! Authentication state lives behind this trait and is injected into the
//! engine at construction. Authorization filters and the auth syncs reach
//! it through the enrichment context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An issued login session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: String,
}

/// Errors surfaced by session stores. Messages become response errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("User already exists")]
    UserExists,

    #[error("Log In Failed")]
    LoginFailed,

    #[error("{0}")]
    Invalid(String),

    #[error("Session store error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an account and return the new user id
    async fn create_account(&self, email: &str, password: &str) -> Result<String, SessionError>;

    /// Check credentials and issue a session token
    async fn login(&self, email: &str, password: &str) -> Result<Session, SessionError>;

    /// Resolve a token to its user, if the token is valid
    async fn validate(&self, token: &str) -> Option<String>;

    /// Invalidate a token. Returns whether it was valid.
    async fn revoke(&self, token: &str) -> bool;
}

/// A store with no accounts; every token is rejected
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSessions;

#[async_trait]
impl SessionStore for NoSessions {
    async fn create_account(&self, _email: &str, _password: &str) -> Result<String, SessionError> {
        Err(SessionError::Invalid("Accounts are disabled".to_string()))
    }

    async fn login(&self, _email: &str, _password: &str) -> Result<Session, SessionError> {
        Err(SessionError::LoginFailed)
    }

    async fn validate(&self, _token: &str) -> Option<String> {
        None
    }

    async fn revoke(&self, _token: &str) -> bool {
        false
    }
}
