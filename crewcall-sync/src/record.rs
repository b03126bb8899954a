//! Action records
//!
//! One record per invocation of a concept action. A record is appended as
//! `Pending` and completed exactly once; afterwards it never changes.

use crate::types::{ActionId, ActionName, Fields, FlowId, Seq, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an action record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Succeeded,
    Failed,
}

/// Result of invoking a concept action
///
/// Failures are data: they are stored in the log as `{error: <message>}`
/// so that rules can pattern-match on them.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Success(Fields),
    Failure(String),
}

impl Completion {
    pub fn success(fields: Fields) -> Self {
        Completion::Success(fields)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Completion::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Completion::Success(_))
    }

    /// Split into the stored status and output map.
    pub(crate) fn into_output(self) -> (Status, Fields) {
        match self {
            Completion::Success(fields) => (Status::Succeeded, fields),
            Completion::Failure(message) => {
                let mut fields = Fields::new();
                fields.insert("error".to_string(), Value::String(message));
                (Status::Failed, fields)
            }
        }
    }
}

impl<E: std::fmt::Display> From<Result<Fields, E>> for Completion {
    fn from(result: Result<Fields, E>) -> Self {
        match result {
            Ok(fields) => Completion::Success(fields),
            Err(e) => Completion::Failure(e.to_string()),
        }
    }
}

/// Provenance attached to a record when it is appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Causal chain the record belongs to
    pub flow: FlowId,
    /// Record whose completion triggered this one
    pub caused_by: Option<ActionId>,
    /// Name of the sync that dispatched this one
    pub synced_by: Option<String>,
}

impl Origin {
    /// Origin for an action with no causing record
    pub fn root(flow: FlowId) -> Self {
        Self {
            flow,
            caused_by: None,
            synced_by: None,
        }
    }

    /// Origin for an action dispatched by a sync
    pub fn synced(flow: FlowId, caused_by: ActionId, sync: impl Into<String>) -> Self {
        Self {
            flow,
            caused_by: Some(caused_by),
            synced_by: Some(sync.into()),
        }
    }
}

/// An entry in the action log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub id: ActionId,
    pub seq: Seq,
    pub action: ActionName,
    pub input: Fields,
    pub output: Option<Fields>,
    pub status: Status,
    pub flow: FlowId,
    pub caused_by: Option<ActionId>,
    pub synced_by: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    pub fn is_complete(&self) -> bool {
        self.status != Status::Pending
    }

    pub fn succeeded(&self) -> bool {
        self.status == Status::Succeeded
    }

    /// Error message of a failed record.
    pub fn error(&self) -> Option<&str> {
        match self.status {
            Status::Failed => self
                .output
                .as_ref()
                .and_then(|out| out.get("error"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}
