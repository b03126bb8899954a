//! Engine coordinator
//!
//! The engine owns the action log, the sync registry, the concept registry,
//! the session store and the request correlator, and wires them into the
//! reaction loop in [`dispatch`]. It is cheap to clone; clones share state.
//!
//! # Example
//!
//! ```no_run
//! use crewcall_sync::Engine;
//! use crewcall_types::fields;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder().build()?;
//! let response = engine
//!     .request(fields! { "path" => "Notify/notify", "recipient" => "u1" })
//!     .await?;
//! println!("{:?}", response.body);
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod error;

pub use error::{EngineError, Result};

use crate::concept::{Concept, ConceptRegistry};
use crate::correlator::{Correlator, OpenRequest, Response};
use crate::log::ActionLog;
use crate::matcher::FiringKey;
use crate::record::{ActionRecord, Origin};
use crate::rule::{SyncRegistry, SyncRule};
use crate::session::{NoSessions, SessionStore};
use crate::types::{ActionName, Fields, FlowId, RequestId, REQUESTING};
use dispatch::InFlight;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Error body used when the watchdog closes a request.
pub const TIMEOUT_ERROR: &str = "Request timed out";

/// Name recorded as `synced_by` on watchdog responses.
const WATCHDOG: &str = "watchdog";

pub(crate) struct EngineInner {
    log: ActionLog,
    syncs: SyncRegistry,
    concepts: ConceptRegistry,
    sessions: Arc<dyn SessionStore>,
    correlator: Correlator,
    fired: Mutex<HashSet<FiringKey>>,
    in_flight: InFlight,
    unmatched: AtomicUsize,
}

/// Runtime statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub records: usize,
    pub completed: usize,
    pub fired: usize,
    pub syncs: usize,
    pub concepts: usize,
    pub open_requests: usize,
    pub closed_requests: usize,
    pub unmatched_requests: usize,
    pub in_flight: usize,
}

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    concepts: Vec<Arc<dyn Concept>>,
    syncs: Vec<SyncRule>,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl EngineBuilder {
    pub fn concept(mut self, concept: Arc<dyn Concept>) -> Self {
        self.concepts.push(concept);
        self
    }

    pub fn sync(mut self, sync: SyncRule) -> Self {
        self.syncs.push(sync);
        self
    }

    pub fn syncs(mut self, syncs: impl IntoIterator<Item = SyncRule>) -> Self {
        self.syncs.extend(syncs);
        self
    }

    /// Session store consulted by auth filters and queries.
    /// Defaults to [`NoSessions`].
    pub fn session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let mut concepts = ConceptRegistry::new();
        for concept in self.concepts {
            concepts.register(concept)?;
        }
        let mut syncs = SyncRegistry::new();
        for sync in self.syncs {
            syncs.register(sync)?;
        }
        report_gaps(&syncs, &concepts);

        info!(
            syncs = syncs.len(),
            concepts = concepts.len(),
            "sync engine ready"
        );
        Ok(Engine {
            inner: Arc::new(EngineInner {
                log: ActionLog::new(),
                syncs,
                concepts,
                sessions: self.sessions.unwrap_or_else(|| Arc::new(NoSessions)),
                correlator: Correlator::new(),
                fired: Mutex::new(HashSet::new()),
                in_flight: InFlight::default(),
                unmatched: AtomicUsize::new(0),
            }),
        })
    }
}

/// Warn about syncs that mention actions no registered concept offers.
/// Such dispatches still happen and complete as failures.
fn report_gaps(syncs: &SyncRegistry, concepts: &ConceptRegistry) {
    let known = |action: &ActionName| {
        if action.concept() == REQUESTING {
            matches!(action.action(), "request" | "respond")
        } else {
            concepts.has_action(action)
        }
    };
    for sync in syncs.iter() {
        let mentioned = sync
            .when()
            .iter()
            .map(|p| &p.action)
            .chain(sync.then().iter().map(|t| &t.action));
        for action in mentioned {
            if !known(action) {
                warn!(sync = %sync.name(), %action, "sync mentions an unknown action");
            }
        }
    }
}

/// The sync engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Submit a request and get a future for its single response
    ///
    /// The request starts a new flow whose id equals the request id.
    /// Must be called from within a tokio runtime.
    pub fn request(&self, input: Fields) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let request = self.inner.open_request(input, Some(tx), None, None);
        PendingResponse { request, rx }
    }

    /// Submit a request, answering `{error: "Request timed out"}` if no
    /// sync responds within `timeout`
    pub async fn request_with_timeout(&self, input: Fields, timeout: Duration) -> Result<Response> {
        let mut pending = self.request(input);
        let request = pending.request_id();
        match tokio::time::timeout(timeout, &mut pending).await {
            Ok(response) => response,
            Err(_) => {
                let mut body = Fields::new();
                body.insert("error".to_string(), TIMEOUT_ERROR.into());
                let origin = Origin {
                    flow: FlowId::from(request),
                    caused_by: None,
                    synced_by: Some(WATCHDOG.to_string()),
                };
                match self.inner.respond(request, body, origin) {
                    Ok(response) => {
                        warn!(request = %request.short(), ?timeout, "request timed out");
                        Ok(response)
                    }
                    // A sync answered between the deadline and the close.
                    Err(_) => pending.await,
                }
            }
        }
    }

    /// Invoke a concept action outside any sync, in a fresh flow
    ///
    /// The completion still triggers matching.
    pub async fn invoke(&self, action: ActionName, input: Fields) -> Result<ActionRecord> {
        if action.concept() == REQUESTING {
            return Err(EngineError::Reserved(action));
        }
        let id = self
            .inner
            .log
            .record(action.clone(), input.clone(), Origin::root(FlowId::new()));
        let completion = self.inner.concepts.invoke(&action, &input).await;
        let record = self.inner.log.complete(id, completion)?;
        self.inner.spawn(self.inner.clone().react(record.clone()));
        Ok(record)
    }

    /// Run a read-only concept query directly
    pub async fn query(&self, query: &ActionName, input: &Fields) -> Result<Vec<Fields>> {
        if !self.inner.concepts.has_query(query) {
            return Err(EngineError::UnknownQuery(query.clone()));
        }
        self.inner
            .concepts
            .query(query, input)
            .await
            .map_err(|message| EngineError::Query {
                query: query.clone(),
                message,
            })
    }

    /// Wait until no dispatch task is running
    pub async fn settled(&self) {
        self.inner.in_flight.wait_idle().await
    }

    pub fn log(&self) -> &ActionLog {
        &self.inner.log
    }

    pub fn syncs(&self) -> &SyncRegistry {
        &self.inner.syncs
    }

    pub fn concepts(&self) -> &ConceptRegistry {
        &self.inner.concepts
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.inner.sessions
    }

    /// Requests that have not been answered
    pub fn open_requests(&self) -> Vec<OpenRequest> {
        self.inner.correlator.open_requests()
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        EngineStats {
            records: inner.log.len(),
            completed: inner.log.completed_count(),
            fired: inner.fired.lock().len(),
            syncs: inner.syncs.len(),
            concepts: inner.concepts.len(),
            open_requests: inner.correlator.open_count(),
            closed_requests: inner.correlator.closed_count(),
            unmatched_requests: inner.unmatched.load(Ordering::SeqCst),
            in_flight: inner.in_flight.current(),
        }
    }
}

/// Future resolving to the response of one request
pub struct PendingResponse {
    request: RequestId,
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    pub fn request_id(&self) -> RequestId {
        self.request
    }
}

impl Future for PendingResponse {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let request = self.request;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| EngineError::ResponseDropped(request)))
    }
}
