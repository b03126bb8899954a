//! Append-only action log
//!
//! Records are appended pending and completed exactly once. Completed
//! records are indexed by `(flow, action)` so the matcher can join within a
//! causal chain without scanning the whole log.

use super::subscription::{CompletionHandler, SubscriptionManager};
use crate::record::{ActionRecord, Completion, Origin, Status};
use crate::types::{ActionId, ActionName, Fields, FlowId, Seq, SubscriptionId};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors raised by the action log
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("Action {0} not found")]
    UnknownAction(ActionId),

    #[error("Action {0} is already complete")]
    AlreadyCompleted(ActionId),
}

#[derive(Default)]
struct LogInner {
    records: Vec<ActionRecord>,
    by_id: HashMap<ActionId, usize>,
    completed: HashMap<(FlowId, ActionName), Vec<usize>>,
    by_flow: HashMap<FlowId, Vec<usize>>,
    completed_count: usize,
}

/// The shared, append-only log of action records
///
/// Appends and scans may run concurrently from any task. Completions are
/// serialized so subscribers observe them in the order they happen.
pub struct ActionLog {
    inner: RwLock<LogInner>,
    subscriptions: Mutex<SubscriptionManager>,
    next_seq: AtomicU64,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LogInner::default()),
            subscriptions: Mutex::new(SubscriptionManager::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Append a pending record and return its identity
    pub fn record(&self, action: ActionName, input: Fields, origin: Origin) -> ActionId {
        let id = ActionId::new();
        let mut inner = self.inner.write();
        // Taken under the write lock so seq order matches append order.
        let seq = Seq(self.next_seq.fetch_add(1, Ordering::SeqCst));
        let index = inner.records.len();
        inner.records.push(ActionRecord {
            id,
            seq,
            action,
            input,
            output: None,
            status: Status::Pending,
            flow: origin.flow,
            caused_by: origin.caused_by,
            synced_by: origin.synced_by,
            recorded_at: Utc::now(),
            completed_at: None,
        });
        inner.by_id.insert(id, index);
        inner.by_flow.entry(origin.flow).or_default().push(index);
        id
    }

    /// Set the output of a pending record and notify subscribers
    ///
    /// Returns a snapshot of the completed record.
    pub fn complete(&self, id: ActionId, completion: Completion) -> Result<ActionRecord, LogError> {
        let mut subscriptions = self.subscriptions.lock();
        let record = {
            let mut inner = self.inner.write();
            let index = *inner.by_id.get(&id).ok_or(LogError::UnknownAction(id))?;
            let record = &mut inner.records[index];
            if record.is_complete() {
                return Err(LogError::AlreadyCompleted(id));
            }
            let (status, output) = completion.into_output();
            record.status = status;
            record.output = Some(output);
            record.completed_at = Some(Utc::now());
            let snapshot = record.clone();
            inner
                .completed
                .entry((snapshot.flow, snapshot.action.clone()))
                .or_default()
                .push(index);
            inner.completed_count += 1;
            snapshot
        };
        subscriptions.notify(&record);
        Ok(record)
    }

    /// Subscribe to completions of one action
    pub fn subscribe(
        &self,
        action: ActionName,
        handler: Box<dyn CompletionHandler>,
    ) -> SubscriptionId {
        self.subscriptions.lock().subscribe(Some(action), handler)
    }

    /// Subscribe to every completion
    pub fn subscribe_all(&self, handler: Box<dyn CompletionHandler>) -> SubscriptionId {
        self.subscriptions.lock().subscribe(None, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().unsubscribe(id)
    }

    /// Snapshot of one record
    pub fn get(&self, id: ActionId) -> Option<ActionRecord> {
        let inner = self.inner.read();
        inner.by_id.get(&id).map(|&i| inner.records[i].clone())
    }

    /// Completed records of `action` within `flow`, in completion order
    pub fn completed_in_flow(&self, flow: FlowId, action: &ActionName) -> Vec<ActionRecord> {
        let inner = self.inner.read();
        inner
            .completed
            .get(&(flow, action.clone()))
            .map(|indices| indices.iter().map(|&i| inner.records[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Every record of a flow, in append order
    pub fn flow(&self, flow: FlowId) -> Vec<ActionRecord> {
        let inner = self.inner.read();
        inner
            .by_flow
            .get(&flow)
            .map(|indices| indices.iter().map(|&i| inner.records[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Every record, in append order
    pub fn records(&self) -> Vec<ActionRecord> {
        self.inner.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed records
    pub fn completed_count(&self) -> usize {
        self.inner.read().completed_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CollectingHandler;
    use crewcall_types::fields;
    use std::sync::Arc;

    fn add_duty() -> ActionName {
        ActionName::new("DutyRoster", "addDuty")
    }

    #[test]
    fn test_record_then_complete() {
        let log = ActionLog::new();
        let flow = FlowId::new();
        let id = log.record(add_duty(), fields! { "title" => "Setup" }, Origin::root(flow));

        let pending = log.get(id).unwrap();
        assert_eq!(pending.status, Status::Pending);
        assert!(log.completed_in_flow(flow, &add_duty()).is_empty());

        let done = log
            .complete(id, Completion::success(fields! { "duty" => "d1" }))
            .unwrap();
        assert!(done.succeeded());
        assert_eq!(log.completed_in_flow(flow, &add_duty()).len(), 1);
        assert_eq!(log.completed_count(), 1);
    }

    #[test]
    fn test_complete_exactly_once() {
        let log = ActionLog::new();
        let id = log.record(add_duty(), Fields::new(), Origin::root(FlowId::new()));
        log.complete(id, Completion::failure("dueAt must be a Date")).unwrap();

        let again = log.complete(id, Completion::success(Fields::new()));
        assert_eq!(again, Err(LogError::AlreadyCompleted(id)));
        assert_eq!(log.get(id).unwrap().error(), Some("dueAt must be a Date"));

        let missing = ActionId::new();
        assert_eq!(
            log.complete(missing, Completion::success(Fields::new())),
            Err(LogError::UnknownAction(missing))
        );
    }

    #[test]
    fn test_flows_are_isolated() {
        let log = ActionLog::new();
        let (a, b) = (FlowId::new(), FlowId::new());
        let ia = log.record(add_duty(), Fields::new(), Origin::root(a));
        let ib = log.record(add_duty(), Fields::new(), Origin::root(b));
        log.complete(ia, Completion::success(Fields::new())).unwrap();
        log.complete(ib, Completion::success(Fields::new())).unwrap();

        let in_a = log.completed_in_flow(a, &add_duty());
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].id, ia);
        assert_eq!(log.flow(b).len(), 1);
    }

    #[test]
    fn test_seq_is_monotonic() {
        let log = ActionLog::new();
        let flow = FlowId::new();
        let first = log.record(add_duty(), Fields::new(), Origin::root(flow));
        let second = log.record(add_duty(), Fields::new(), Origin::root(flow));
        assert!(log.get(first).unwrap().seq < log.get(second).unwrap().seq);
    }

    #[test]
    fn test_subscribers_see_completions_once() {
        let log = Arc::new(ActionLog::new());
        let collected = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = collected.clone();
        log.subscribe(
            add_duty(),
            Box::new(crate::log::CallbackHandler::new(move |r: &ActionRecord| {
                sink.lock().push(r.id)
            })),
        );
        let all = log.subscribe_all(Box::new(CollectingHandler::new()));

        let id = log.record(add_duty(), Fields::new(), Origin::root(FlowId::new()));
        log.complete(id, Completion::success(Fields::new())).unwrap();
        let _ = log.complete(id, Completion::success(Fields::new()));

        assert_eq!(*collected.lock(), vec![id]);
        assert!(log.unsubscribe(all));
    }
}
