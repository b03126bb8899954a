//! Shared types for crewcall
//!
//! This crate provides the identifiers and field-map values passed between
//! the sync engine, the concepts and the request ingestion layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Dynamic field value carried by actions, frames and responses.
pub type Value = serde_json::Value;

/// Named field bindings. Ordered so records and responses print deterministically.
pub type Fields = BTreeMap<String, Value>;

/// Build a [`Fields`] map from `key => value` pairs.
///
/// ```
/// use crewcall_types::fields;
///
/// let f = fields! { "title" => "Setup", "count" => 3 };
/// assert_eq!(f["count"], 3);
/// ```
#[macro_export]
macro_rules! fields {
    () => { $crate::Fields::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Fields::new();
        $( map.insert(($key).to_string(), $crate::Value::from($value)); )+
        map
    }};
}

/// Read a string field, if present and a string.
pub fn field_str<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str)
}

/// Error raised when parsing identifiers or action names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid action name '{0}': expected <Concept>.<action>")]
    ActionName(String),

    #[error("invalid identifier '{0}'")]
    Identifier(String),
}

/// Fully-qualified action or query name, `<Concept>.<action>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionName {
    concept: String,
    action: String,
}

impl ActionName {
    pub fn new(concept: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            action: action.into(),
        }
    }

    pub fn concept(&self) -> &str {
        &self.concept
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.concept, self.action)
    }
}

impl FromStr for ActionName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((concept, action)) if !concept.is_empty() && !action.is_empty() => {
                Ok(Self::new(concept, action))
            }
            _ => Err(ParseError::ActionName(s.to_string())),
        }
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh, globally unique identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn uuid(&self) -> Uuid {
                self.0
            }

            /// Short form for log lines.
            pub fn short(&self) -> String {
                format!("{}:{}", $prefix, &self.0.simple().to_string()[..8])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| ParseError::Identifier(s.to_string()))
            }
        }
    };
}

uuid_id!(
    /// Identity of one action record in the log.
    ActionId,
    "act"
);

uuid_id!(
    /// Causal chain identifier. Every request starts a new flow; actions
    /// dispatched by syncs inherit the flow of the record that triggered them.
    FlowId,
    "flow"
);

uuid_id!(
    /// Correlation key tying one inbound request to its single response.
    RequestId,
    "req"
);

impl From<RequestId> for FlowId {
    fn from(id: RequestId) -> Self {
        FlowId(id.0)
    }
}

impl From<RequestId> for Value {
    fn from(id: RequestId) -> Self {
        Value::String(id.to_string())
    }
}
