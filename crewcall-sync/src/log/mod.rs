//! The action log and completion subscriptions
//!
//! The log is the only shared mutable state between syncs: every concept
//! invocation is appended here and every completion fans out to subscribers.

mod store;
mod subscription;

pub use store::{ActionLog, LogError};
pub use subscription::{
    CallbackHandler, CollectingHandler, CompletionHandler, SubscriptionManager,
};
