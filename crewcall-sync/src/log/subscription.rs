//! Completion subscriptions
//!
//! Handlers registered here are notified once per completed record whose
//! action matches their filter, in the order completions occur.

use crate::record::ActionRecord;
use crate::types::{ActionName, SubscriptionId};
use std::collections::BTreeMap;

/// Trait for handling completion events
///
/// Handlers run while the log serializes completions, so they must be
/// cheap and must not call back into the log.
pub trait CompletionHandler: Send {
    /// Called when a matching record completes
    fn on_completed(&mut self, record: &ActionRecord);
}

/// A completion handler that calls a closure
pub struct CallbackHandler<F>
where
    F: FnMut(&ActionRecord) + Send,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: FnMut(&ActionRecord) + Send,
{
    /// Create a new callback handler
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> CompletionHandler for CallbackHandler<F>
where
    F: FnMut(&ActionRecord) + Send,
{
    fn on_completed(&mut self, record: &ActionRecord) {
        (self.callback)(record);
    }
}

/// A completion handler that collects records
#[derive(Debug, Default)]
pub struct CollectingHandler {
    /// Collected records
    pub records: Vec<ActionRecord>,
}

impl CollectingHandler {
    /// Create a new collecting handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected records, leaving the handler empty
    pub fn take(&mut self) -> Vec<ActionRecord> {
        std::mem::take(&mut self.records)
    }
}

impl CompletionHandler for CollectingHandler {
    fn on_completed(&mut self, record: &ActionRecord) {
        self.records.push(record.clone());
    }
}

/// A registered subscription: optional action filter plus handler
struct Subscription {
    action: Option<ActionName>,
    handler: Box<dyn CompletionHandler>,
}

/// Manages subscriptions and dispatches completions
///
/// Subscriptions are kept in registration order so notification order is
/// deterministic.
#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: BTreeMap<u64, Subscription>,
}

impl SubscriptionManager {
    /// Create a new subscription manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to completions of one action, or of every action when `None`
    pub fn subscribe(
        &mut self,
        action: Option<ActionName>,
        handler: Box<dyn CompletionHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscriptions
            .insert(id.0, Subscription { action, handler });
        id
    }

    /// Unsubscribe
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id.0).is_some()
    }

    /// Get the number of active subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check if there are no subscriptions
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Notify every matching subscriber of a completion
    pub fn notify(&mut self, record: &ActionRecord) {
        for sub in self.subscriptions.values_mut() {
            let interested = sub
                .action
                .as_ref()
                .map_or(true, |action| action == &record.action);
            if interested {
                sub.handler.on_completed(record);
            }
        }
    }
}
