//! Core type definitions for the sync engine
//!
//! Identity types shared with the rest of the workspace are re-exported from
//! `crewcall-types`; the counters here are process-local.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use crewcall_types::{ActionId, ActionName, Fields, FlowId, RequestId, Value};

/// Name of the built-in request/response concept.
pub const REQUESTING: &str = "Requesting";

/// `Requesting.request`
pub fn request_action() -> ActionName {
    ActionName::new(REQUESTING, "request")
}

/// `Requesting.respond`
pub fn respond_action() -> ActionName {
    ActionName::new(REQUESTING, "respond")
}

/// Subscription identifier
///
/// Returned when subscribing to completions in the action log,
/// used to later unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    /// Create a new unique subscription ID
    pub fn new() -> Self {
        Self(SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Position of a record in the action log
///
/// Sequence numbers are assigned when a record is appended and increase
/// monotonically for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Seq(pub u64);

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_id_uniqueness() {
        let s1 = SubscriptionId::new();
        let s2 = SubscriptionId::new();
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_builtin_action_names() {
        assert_eq!(request_action().to_string(), "Requesting.request");
        assert_eq!(respond_action().concept(), REQUESTING);
    }
}
