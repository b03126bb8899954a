//! Event duty concepts for crewcall
//!
//! Four independent concepts, each a [`Concept`](crewcall_sync::Concept)
//! the sync engine can invoke and query:
//!
//! - [`DutyRoster`]: duties for an event, `Open -> Assigned -> Done`
//! - [`EventDirectory`]: events and organizer/member roles
//! - [`NotifyConcept`]: per-user notifications
//! - [`RotationGroups`]: duty templates applied to events
//!
//! Concepts never call each other. Cross-concept checks are injected as
//! guards ([`OrganizerGuard`], [`UserExistenceGuard`]) and everything else
//! is composed by synchronizations.
//!
//! State lives in [`storage::Collection`]s of versioned documents so that
//! read-check-write sequences commit atomically.

pub mod dates;
pub mod duty_roster;
pub mod error;
pub mod event_directory;
pub mod notify;
pub mod rotation_groups;
pub mod storage;
mod wire;

use crewcall_sync::EngineBuilder;
use std::sync::Arc;

pub use duty_roster::{Duty, DutyRoster, DutyStatus, OrganizerGuard};
pub use error::{ConceptError, Result};
pub use event_directory::{Event, EventDirectory, Membership, Role};
pub use notify::{Notification, NotifyConcept, UserExistenceGuard};
pub use rotation_groups::{AppliedDuty, Application, RotationGroups, Template};

/// The standard concept set, with the roster guarded by the directory
pub struct Concepts {
    pub directory: Arc<EventDirectory>,
    pub roster: Arc<DutyRoster>,
    pub notify: Arc<NotifyConcept>,
    pub rotation: Arc<RotationGroups>,
}

impl Concepts {
    /// Build the concept set. `users` gates notification recipients when given.
    pub fn new(users: Option<Arc<dyn UserExistenceGuard>>) -> Self {
        let directory = Arc::new(EventDirectory::new());
        let roster = Arc::new(DutyRoster::with_guard(directory.clone()));
        let notify = Arc::new(match users {
            Some(guard) => NotifyConcept::with_guard(guard),
            None => NotifyConcept::new(),
        });
        Self {
            directory,
            roster,
            notify,
            rotation: Arc::new(RotationGroups::new()),
        }
    }

    /// Add every concept to an engine under construction
    pub fn install(&self, builder: EngineBuilder) -> EngineBuilder {
        builder
            .concept(self.directory.clone())
            .concept(self.roster.clone())
            .concept(self.notify.clone())
            .concept(self.rotation.clone())
    }
}
