//! Error types for the sync engine

use crate::concept::RegistryError;
use crate::log::LogError;
use crate::rule::SyncError;
use crate::types::{ActionName, RequestId};
use thiserror::Error;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Concept registration errors
    #[error("Concept registration failed: {0}")]
    Registry(#[from] RegistryError),

    /// Sync construction or registration errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Action log errors
    #[error("Action log error: {0}")]
    Log(#[from] LogError),

    /// Query not offered by any registered concept
    #[error("Unknown query {0}")]
    UnknownQuery(ActionName),

    /// A concept query returned an error
    #[error("Query {query} failed: {message}")]
    Query { query: ActionName, message: String },

    /// Built-in actions are reached through `request`, not `invoke`
    #[error("{0} cannot be invoked directly")]
    Reserved(ActionName),

    /// The exchange closed without delivering a response
    #[error("Response channel for request {0} closed")]
    ResponseDropped(RequestId),
}

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
