//! Request/response correlation
//!
//! Every inbound request opens an exchange keyed by its request id. The
//! exchange closes exactly once: the first respond wins, records itself and
//! hands the response to the waiting caller; later responds are suppressed.
//! The check and the commit happen under the exchange's own mutex, so two
//! syncs racing to respond cannot both get through. Once closed, an
//! exchange's state is released and only a closed marker stays behind.

use crate::types::{Fields, RequestId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// The single response delivered for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request: RequestId,
    pub body: Fields,
}

impl Response {
    /// Build a response from respond fields, dropping the correlation key
    /// and null-valued fields
    pub fn new(request: RequestId, fields: &Fields) -> Self {
        let body = fields
            .iter()
            .filter(|(name, value)| name.as_str() != "request" && !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self { request, body }
    }

    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(|v| v.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.body.contains_key("error")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("Request {0} is not known")]
    UnknownRequest(RequestId),

    #[error("Request {0} has already been answered")]
    AlreadyClosed(RequestId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeState {
    Open,
    Closed,
}

struct Exchange {
    state: ExchangeState,
    path: Option<String>,
    opened_at: DateTime<Utc>,
    waiter: Option<oneshot::Sender<Response>>,
}

enum Slot {
    Open(Arc<Mutex<Exchange>>),
    Closed,
}

/// Summary of an exchange that has not been answered yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenRequest {
    pub request: RequestId,
    pub path: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// Tracks the open/closed state of every request
#[derive(Default)]
pub struct Correlator {
    exchanges: DashMap<RequestId, Slot>,
    closed: AtomicUsize,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an exchange. `waiter` receives the response when one is given.
    pub fn open(
        &self,
        request: RequestId,
        path: Option<String>,
        waiter: Option<oneshot::Sender<Response>>,
    ) {
        self.exchanges.insert(
            request,
            Slot::Open(Arc::new(Mutex::new(Exchange {
                state: ExchangeState::Open,
                path,
                opened_at: Utc::now(),
                waiter,
            }))),
        );
    }

    /// Close an exchange, running `commit` while holding its lock
    ///
    /// Returns the commit result and the waiter to deliver to. Only the
    /// first close of an exchange succeeds.
    pub fn close<T>(
        &self,
        request: RequestId,
        commit: impl FnOnce() -> T,
    ) -> Result<(T, Option<oneshot::Sender<Response>>), CorrelatorError> {
        let exchange = self.exchange(request)?;

        let (committed, waiter) = {
            let mut exchange = exchange.lock();
            if exchange.state == ExchangeState::Closed {
                return Err(CorrelatorError::AlreadyClosed(request));
            }
            let committed = commit();
            exchange.state = ExchangeState::Closed;
            (committed, exchange.waiter.take())
        };
        self.closed.fetch_add(1, Ordering::SeqCst);
        // Not under the exchange lock: readers hold a shard while locking it.
        self.exchanges.insert(request, Slot::Closed);
        Ok((committed, waiter))
    }

    fn exchange(&self, request: RequestId) -> Result<Arc<Mutex<Exchange>>, CorrelatorError> {
        match self.exchanges.get(&request).as_deref() {
            Some(Slot::Open(exchange)) => Ok(exchange.clone()),
            Some(Slot::Closed) => Err(CorrelatorError::AlreadyClosed(request)),
            None => Err(CorrelatorError::UnknownRequest(request)),
        }
    }

    pub fn is_open(&self, request: RequestId) -> bool {
        self.exchange(request)
            .is_ok_and(|exchange| exchange.lock().state == ExchangeState::Open)
    }

    /// Exchanges still holding state; closed ones keep only a marker
    pub fn retained(&self) -> usize {
        self.exchanges
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Open(_)))
            .count()
    }

    /// Exchanges still waiting for a response
    pub fn open_requests(&self) -> Vec<OpenRequest> {
        let mut open: Vec<_> = self
            .exchanges
            .iter()
            .filter_map(|entry| {
                let Slot::Open(exchange) = entry.value() else {
                    return None;
                };
                let exchange = exchange.lock();
                (exchange.state == ExchangeState::Open).then(|| OpenRequest {
                    request: *entry.key(),
                    path: exchange.path.clone(),
                    opened_at: exchange.opened_at,
                })
            })
            .collect();
        open.sort_by_key(|r| r.opened_at);
        open
    }

    pub fn total(&self) -> usize {
        self.exchanges.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.total().saturating_sub(self.closed_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewcall_types::fields;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_response_drops_nulls_and_request_key() {
        let request = RequestId::new();
        let mut fields = fields! { "request" => request, "duty" => "d1" };
        fields.insert("title".into(), json!(null));
        let response = Response::new(request, &fields);
        assert_eq!(response.body, fields! { "duty" => "d1" });
        assert!(!response.is_error());
    }

    #[tokio::test]
    async fn test_first_close_wins() {
        let correlator = Correlator::new();
        let request = RequestId::new();
        let (tx, rx) = oneshot::channel();
        correlator.open(request, Some("DutyRoster/addDuty".into()), Some(tx));
        assert_eq!(correlator.open_count(), 1);

        let (value, waiter) = correlator.close(request, || 7).unwrap();
        assert_eq!(value, 7);
        waiter
            .unwrap()
            .send(Response::new(request, &fields! { "duty" => "d1" }))
            .unwrap();

        assert_eq!(
            correlator.close(request, || 8).unwrap_err(),
            CorrelatorError::AlreadyClosed(request)
        );
        assert_eq!(rx.await.unwrap().body, fields! { "duty" => "d1" });
        assert!(!correlator.is_open(request));
        assert_eq!(correlator.closed_count(), 1);
    }

    #[test]
    fn test_closed_exchanges_release_their_state() {
        let correlator = Correlator::new();
        let requests: Vec<_> = (0..4).map(|_| RequestId::new()).collect();
        for request in &requests {
            correlator.open(*request, Some("Notify/notify".into()), None);
        }
        assert_eq!(correlator.retained(), 4);

        for request in &requests[..3] {
            correlator.close(*request, || ()).unwrap();
        }
        assert_eq!(correlator.retained(), 1);
        assert_eq!(correlator.total(), 4);
        assert_eq!(correlator.open_count(), 1);
        assert_eq!(
            correlator.close(requests[0], || ()).unwrap_err(),
            CorrelatorError::AlreadyClosed(requests[0])
        );
        assert_eq!(correlator.open_requests()[0].request, requests[3]);
    }

    #[test]
    fn test_unknown_request() {
        let correlator = Correlator::new();
        let request = RequestId::new();
        assert_eq!(
            correlator.close(request, || ()).unwrap_err(),
            CorrelatorError::UnknownRequest(request)
        );
    }

    #[test]
    fn test_racing_closes_commit_once() {
        let correlator = Arc::new(Correlator::new());
        let request = RequestId::new();
        correlator.open(request, None, None);
        let commits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let correlator = correlator.clone();
                let commits = commits.clone();
                std::thread::spawn(move || {
                    correlator
                        .close(request, || commits.fetch_add(1, Ordering::SeqCst))
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert!(correlator.open_requests().is_empty());
    }
}
