//! Reaction loop: match, enrich, dispatch
//!
//! Every completion gets its own matching pass on its own task. Passes for
//! unrelated completions run concurrently; the `fired` set makes sure each
//! firing key dispatches at most once however the passes interleave.

use super::EngineInner;
use crate::correlator::{CorrelatorError, Response};
use crate::enrich::{self, EnrichContext};
use crate::matcher::{self, FiringKey};
use crate::pattern::Frame;
use crate::record::{ActionRecord, Completion, Origin};
use crate::rule::SyncRule;
use crate::types::{
    request_action, respond_action, ActionId, ActionName, Fields, FlowId, RequestId, REQUESTING,
};
use crewcall_types::{field_str, fields};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

/// Counts spawned dispatch tasks so callers can wait for quiescence
#[derive(Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases an in-flight slot when its task ends, including by panic
struct InFlightGuard(Arc<EngineInner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.exit();
    }
}

impl EngineInner {
    /// Run `task` on its own tokio task, tracked for `settled()`
    pub(crate) fn spawn<F>(self: &Arc<Self>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.in_flight.enter();
        let guard = InFlightGuard(self.clone());
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    /// Matching pass for one completed record
    pub(crate) fn react(self: Arc<Self>, record: ActionRecord) -> BoxFuture<'static, ()> {
        async move {
            let matches = matcher::matches_for(&self.log, &self.syncs, &record);
            let mut fired = 0usize;
            let mut replayed = false;

            for found in matches {
                let key = found.key();
                if !self.claim(&key) {
                    debug!(sync = %key.sync, "firing already consumed");
                    replayed = true;
                    continue;
                }
                let frames = {
                    let cx = EnrichContext {
                        concepts: &self.concepts,
                        sessions: self.sessions.as_ref(),
                    };
                    enrich::apply(found.sync.stages(), found.frame, &cx).await
                };
                for frame in &frames {
                    if self.fire(&found.sync, frame, &record) {
                        fired += 1;
                    }
                }
            }

            if fired == 0 && !replayed && record.action == request_action() {
                self.unmatched.fetch_add(1, Ordering::SeqCst);
                warn!(
                    path = field_str(&record.input, "path").unwrap_or("<none>"),
                    flow = %record.flow.short(),
                    "request matched no sync"
                );
            }
        }
        .boxed()
    }

    fn claim(&self, key: &FiringKey) -> bool {
        self.fired.lock().insert(key.clone())
    }

    /// Dispatch every `then` action of `sync` for one frame
    ///
    /// The frame is dropped as a whole when any template needs a variable
    /// the frame does not bind.
    fn fire(self: &Arc<Self>, sync: &SyncRule, frame: &Frame, trigger: &ActionRecord) -> bool {
        let mut actions: Vec<(&ActionName, Fields)> = Vec::with_capacity(sync.then().len());
        for template in sync.then() {
            match template.instantiate(frame) {
                Ok(input) => actions.push((&template.action, input)),
                Err(var) => {
                    warn!(sync = %sync.name(), %var, "unbound variable in then clause; frame dropped");
                    return false;
                }
            }
        }

        debug!(sync = %sync.name(), flow = %trigger.flow.short(), "sync fired");
        for (action, input) in actions {
            let origin = Origin::synced(trigger.flow, trigger.id, sync.name());
            if action.concept() == REQUESTING {
                match action.action() {
                    "respond" => self.respond_from_sync(input, origin),
                    "request" => {
                        self.open_request(input, None, origin.caused_by, origin.synced_by);
                    }
                    other => warn!(sync = %sync.name(), action = %other, "unknown Requesting action"),
                }
            } else {
                self.invoke_action(action.clone(), input, origin);
            }
        }
        true
    }

    /// Record an action and invoke its concept on a new task
    pub(crate) fn invoke_action(self: &Arc<Self>, action: ActionName, input: Fields, origin: Origin) {
        let id = self.log.record(action.clone(), input.clone(), origin);
        let inner = self.clone();
        self.spawn(async move {
            let completion = inner.concepts.invoke(&action, &input).await;
            if let Completion::Failure(error) = &completion {
                debug!(%action, %error, "action failed");
            }
            match inner.log.complete(id, completion) {
                Ok(record) => inner.react(record).await,
                Err(error) => warn!(%action, %error, "could not complete action"),
            }
        });
    }

    /// Open an exchange and record its request action in a new flow
    pub(crate) fn open_request(
        self: &Arc<Self>,
        input: Fields,
        waiter: Option<oneshot::Sender<Response>>,
        caused_by: Option<ActionId>,
        synced_by: Option<String>,
    ) -> RequestId {
        let request = RequestId::new();
        let path = field_str(&input, "path").map(str::to_string);
        self.correlator.open(request, path.clone(), waiter);

        let origin = Origin {
            flow: FlowId::from(request),
            caused_by,
            synced_by,
        };
        let id = self.log.record(request_action(), input, origin);
        match self
            .log
            .complete(id, Completion::success(fields! { "request" => request }))
        {
            Ok(record) => {
                info!(request = %request.short(), path = ?path, "request received");
                self.spawn(self.clone().react(record));
            }
            Err(error) => warn!(request = %request.short(), %error, "could not record request"),
        }
        request
    }

    fn respond_from_sync(self: &Arc<Self>, input: Fields, origin: Origin) {
        let Some(request) = field_str(&input, "request").and_then(|r| r.parse::<RequestId>().ok())
        else {
            warn!(sync = ?origin.synced_by, "respond without a valid request id");
            return;
        };
        let sync = origin.synced_by.clone().unwrap_or_default();
        let origin = Origin {
            flow: FlowId::from(request),
            ..origin
        };
        match self.respond(request, input, origin) {
            Ok(_) => {}
            Err(CorrelatorError::AlreadyClosed(_)) => {
                debug!(request = %request.short(), %sync, "duplicate response suppressed");
            }
            Err(error) => warn!(request = %request.short(), %error, "respond rejected"),
        }
    }

    /// Close an exchange with `fields` as the response body
    ///
    /// Only the first close of a request records a respond action and
    /// delivers to the caller.
    pub(crate) fn respond(
        self: &Arc<Self>,
        request: RequestId,
        mut fields: Fields,
        origin: Origin,
    ) -> Result<Response, CorrelatorError> {
        fields.insert("request".to_string(), request.into());
        let response = Response::new(request, &fields);
        let (recorded, waiter) = self.correlator.close(request, || {
            let id = self.log.record(respond_action(), fields, origin);
            self.log.complete(id, Completion::success(Fields::new()))
        })?;

        if let Some(waiter) = waiter {
            if waiter.send(response.clone()).is_err() {
                debug!(request = %request.short(), "caller went away before the response");
            }
        }
        info!(
            request = %request.short(),
            error = response.error().unwrap_or(""),
            "request answered"
        );
        match recorded {
            Ok(record) => self.spawn(self.clone().react(record)),
            Err(error) => warn!(request = %request.short(), %error, "could not record response"),
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use crate::concept::Concept;
    use crate::engine::Engine;
    use crate::pattern::{lit, var, Pattern};
    use crate::record::{ActionRecord, Completion};
    use crate::rule::{ActionTemplate, SyncBuilder};
    use crate::types::{respond_action, ActionName, Fields};
    use async_trait::async_trait;
    use crewcall_types::fields;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Concept for Counter {
        fn name(&self) -> &str {
            "Counter"
        }

        fn actions(&self) -> &[&'static str] {
            &["bump"]
        }

        fn queries(&self) -> &[&'static str] {
            &[]
        }

        async fn invoke(&self, _action: &str, _input: &Fields) -> Completion {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Completion::success(fields! { "count" => n })
        }

        async fn query(&self, query: &str, _input: &Fields) -> Result<Vec<Fields>, String> {
            Err(format!("Unknown query {query}"))
        }
    }

    fn name(s: &str) -> ActionName {
        s.parse().unwrap()
    }

    fn engine(counter: Arc<Counter>) -> Engine {
        let request = || {
            Pattern::new(name("Requesting.request"))
                .input("path", lit("Counter/bump"))
                .output("request", var("request"))
        };
        Engine::builder()
            .concept(counter)
            .sync(
                SyncBuilder::new("Counter_bump_Request")
                    .when(request())
                    .then(ActionTemplate::new(name("Counter.bump")))
                    .build()
                    .unwrap(),
            )
            .sync(
                SyncBuilder::new("Counter_bump_Response")
                    .when(request())
                    .when(Pattern::new(name("Counter.bump")).outputs(&["count"]))
                    .then(ActionTemplate::new(respond_action()).binds(&["request", "count"]))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn completed(engine: &Engine, action: &str) -> ActionRecord {
        engine
            .log()
            .records()
            .into_iter()
            .find(|r| r.action == name(action) && r.is_complete())
            .unwrap()
    }

    fn count(engine: &Engine, action: &ActionName) -> usize {
        engine
            .log()
            .records()
            .iter()
            .filter(|r| &r.action == action)
            .count()
    }

    #[tokio::test]
    async fn test_replayed_completions_never_dispatch_twice() {
        let counter = Arc::new(Counter::default());
        let engine = engine(counter.clone());

        let response = engine.request(fields! { "path" => "Counter/bump" }).await.unwrap();
        engine.settled().await;
        assert_eq!(response.body, fields! { "count" => 1 });

        let before = engine.stats();
        let bumped = completed(&engine, "Counter.bump");
        let requested = completed(&engine, "Requesting.request");

        for _ in 0..2 {
            engine.inner.clone().react(bumped.clone()).await;
            engine.inner.clone().react(requested.clone()).await;
        }
        engine.settled().await;

        let after = engine.stats();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(count(&engine, &name("Counter.bump")), 1);
        assert_eq!(count(&engine, &respond_action()), 1);
        assert_eq!(after.fired, before.fired);
        assert_eq!(after.records, before.records);
        assert_eq!(after.unmatched_requests, 0);
    }

    #[tokio::test]
    async fn test_concurrent_replays_claim_once() {
        let counter = Arc::new(Counter::default());
        let engine = engine(counter.clone());

        engine.request(fields! { "path" => "Counter/bump" }).await.unwrap();
        engine.settled().await;
        let requested = completed(&engine, "Requesting.request");

        let passes: Vec<_> = (0..8)
            .map(|_| tokio::spawn(engine.inner.clone().react(requested.clone())))
            .collect();
        for pass in passes {
            pass.await.unwrap();
        }
        engine.settled().await;

        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(count(&engine, &respond_action()), 1);
    }
}
