//! Concept errors
//!
//! The display text of each variant is exactly the message a client sees in
//! the `error` field of a failed action.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConceptError {
    /// Malformed or out-of-range input, or an action not allowed in the
    /// current state
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    /// A concurrent write moved the document since it was read
    #[error("{0}")]
    Conflict(String),
}

impl ConceptError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConceptError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ConceptError::Forbidden(message.into())
    }
}

impl From<serde_json::Error> for ConceptError {
    fn from(e: serde_json::Error) -> Self {
        ConceptError::Validation(format!("Invalid input: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, ConceptError>;
