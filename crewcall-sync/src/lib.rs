//! crewcall-sync - the synchronization engine behind crewcall
//!
//! Concepts are independent units of state and behavior that never call
//! each other. They are composed by *syncs*: declarative rules that watch a
//! shared log of completed actions and dispatch further actions when their
//! patterns match.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Engine                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  request ──► Correlator ──► ActionLog ◄──── complete ◄──┐    │
//! │               (open)            │                        │    │
//! │                                 ▼                        │    │
//! │                              Matcher ── SyncRegistry     │    │
//! │                                 │                        │    │
//! │                                 ▼                        │    │
//! │                           where stages                   │    │
//! │                       (filters, queries)                 │    │
//! │                                 │                        │    │
//! │                                 ▼                        │    │
//! │                            Dispatcher ──► Concept::invoke┘    │
//! │                                 │                             │
//! │                                 ▼                             │
//! │            Requesting.respond ──► Correlator (close once)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Action log
//!
//! Every invocation is appended as a pending [`ActionRecord`] and completed
//! exactly once, with an output map or an `error` field. Records carry the
//! *flow* they belong to: the causal chain rooted at one request.
//!
//! ## Syncs
//!
//! A [`SyncRule`] has `when` patterns joined within a flow, optional
//! `where` stages that filter or enrich the bindings, and `then` templates
//! instantiated once per surviving frame. Each (sync, records) combination
//! fires at most once.
//!
//! ## Requests
//!
//! The built-in `Requesting` concept turns an inbound request into a
//! `Requesting.request` record and guarantees that at most one
//! `Requesting.respond` is delivered for it.
//!
//! # Customization Points
//!
//! - [`Concept`]: adapter for a unit of behavior
//! - [`SessionStore`]: authentication state for auth filters and syncs
//! - [`FrameFilter`] / [`FrameQuery`]: custom `where` stages

pub mod concept;
pub mod correlator;
pub mod engine;
pub mod enrich;
pub mod log;
pub mod matcher;
pub mod pattern;
pub mod record;
pub mod rule;
pub mod session;
pub mod types;

// Re-exports for convenience
pub use concept::{Concept, ConceptRegistry, RegistryError};
pub use correlator::{OpenRequest, Response};
pub use engine::{Engine, EngineBuilder, EngineError, EngineStats, PendingResponse, TIMEOUT_ERROR};
pub use enrich::{
    ClosureFilter, ConceptQuery, EnrichContext, FrameFilter, FrameQuery, QueryStage, WhereStage,
};
pub use log::{ActionLog, CallbackHandler, CollectingHandler, CompletionHandler, LogError};
pub use matcher::FiringKey;
pub use pattern::{lit, opt, var, Frame, Pattern, Term};
pub use record::{ActionRecord, Completion, Origin, Status};
pub use rule::{ActionTemplate, SyncBuilder, SyncError, SyncRegistry, SyncRule};
pub use session::{NoSessions, Session, SessionError, SessionStore};
pub use types::{request_action, respond_action, SubscriptionId, REQUESTING};

pub use crewcall_types::{fields, ActionId, ActionName, Fields, FlowId, RequestId, Value};
