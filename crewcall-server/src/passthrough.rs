//! Passthrough table: which concept operations bypass the sync engine
//!
//! Inclusions are read-only queries served directly, each with a
//! justification. Exclusions are mutating or internal operations that must
//! go through `Requesting.request` and the authorization gate. Routes in
//! neither list also go through `Requesting`, but are reported at startup
//! as unverified.

use std::collections::{BTreeMap, BTreeSet};

use crewcall_sync::ConceptRegistry;
use serde::Serialize;

const INCLUSIONS: &[(&str, &str)] = &[
    ("DutyRoster/_getDuty", "read-only duty details for UI"),
    ("DutyRoster/_getEventDuties", "read-only list for event view"),
    ("DutyRoster/_getUserDuties", "read-only list for My Duties"),
    ("EventDirectory/eventExists", "public existence check for routing"),
    ("EventDirectory/_getEventMembers", "read-only members list"),
    ("EventDirectory/_getUserEvents", "read-only user's events"),
    ("EventDirectory/_getEvent", "read-only event details"),
    ("Notify/_getNotification", "read-only single notification"),
    ("Notify/_listUserNotifications", "read-only inbox list"),
    ("RotationGroups/_getTemplate", "read-only template details"),
    ("RotationGroups/_listTemplatesByOwner", "read-only owner's templates"),
    ("RotationGroups/_getApplication", "read-only application details"),
    (
        "RotationGroups/_getAppliedDutiesForApplication",
        "read-only applied duties",
    ),
];

const EXCLUSIONS: &[&str] = &[
    "DutyRoster/addDuty",
    "DutyRoster/assignDuty",
    "DutyRoster/unassignDuty",
    "DutyRoster/updateDuty",
    "DutyRoster/markDone",
    "DutyRoster/reOpen",
    "DutyRoster/deleteDuty",
    "EventDirectory/hasOrganizerRole",
    "EventDirectory/createEvent",
    "EventDirectory/invite",
    "EventDirectory/setActive",
    "EventDirectory/removeMember",
    "EventDirectory/deleteEvent",
    "Notify/notify",
    "Notify/markRead",
    "Notify/deleteNotification",
    "RotationGroups/createTemplate",
    "RotationGroups/updateTemplate",
    "RotationGroups/deleteTemplate",
    "RotationGroups/applyTemplate",
];

/// Strip an `/api/` prefix and leading slashes: `/api/Notify/notify` -> `Notify/notify`
pub fn normalize(route: &str) -> &str {
    let route = route.trim_start_matches('/');
    route
        .strip_prefix("api/")
        .unwrap_or(route)
        .trim_start_matches('/')
}

/// How a route is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing<'a> {
    /// Served directly by the named concept query
    Passthrough { justification: &'a str },
    /// Goes through `Requesting` and requires a valid token
    Gated,
    /// Goes through `Requesting`; not listed in the table
    Unlisted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassthroughTable {
    inclusions: BTreeMap<String, String>,
    exclusions: BTreeSet<String>,
}

impl PassthroughTable {
    /// The table shipped with the standard concept set
    pub fn standard() -> Self {
        let mut table = Self::default();
        for (route, why) in INCLUSIONS {
            table.include(route, why);
        }
        for route in EXCLUSIONS {
            table.exclude(route);
        }
        table
    }

    pub fn include(&mut self, route: &str, justification: &str) {
        self.inclusions
            .insert(normalize(route).to_string(), justification.to_string());
    }

    pub fn exclude(&mut self, route: &str) {
        self.exclusions.insert(normalize(route).to_string());
    }

    pub fn routing(&self, route: &str) -> Routing<'_> {
        let route = normalize(route);
        if let Some(justification) = self.inclusions.get(route) {
            Routing::Passthrough { justification }
        } else if self.exclusions.contains(route) {
            Routing::Gated
        } else {
            Routing::Unlisted
        }
    }

    pub fn is_excluded(&self, route: &str) -> bool {
        self.exclusions.contains(normalize(route))
    }

    pub fn inclusions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inclusions.iter().map(|(r, j)| (r.as_str(), j.as_str()))
    }

    pub fn exclusions(&self) -> impl Iterator<Item = &str> {
        self.exclusions.iter().map(String::as_str)
    }

    /// Concept operations the table does not classify
    pub fn unverified_routes(&self, concepts: &ConceptRegistry) -> Vec<String> {
        operations(concepts)
            .into_iter()
            .filter(|route| matches!(self.routing(route), Routing::Unlisted))
            .collect()
    }

    /// Table entries naming an operation no concept offers
    pub fn stale_routes(&self, concepts: &ConceptRegistry) -> Vec<String> {
        let known: BTreeSet<String> = operations(concepts).into_iter().collect();
        self.inclusions
            .keys()
            .chain(self.exclusions.iter())
            .filter(|route| !known.contains(*route))
            .cloned()
            .collect()
    }
}

/// Every `<Concept>/<operation>` route the registry can serve
fn operations(concepts: &ConceptRegistry) -> Vec<String> {
    let mut routes = Vec::new();
    for name in concepts.names() {
        let Some(concept) = concepts.get(name) else {
            continue;
        };
        for op in concept.actions().iter().chain(concept.queries()) {
            routes.push(format!("{name}/{op}"));
        }
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewcall_concepts::Concepts;

    fn registry() -> ConceptRegistry {
        let concepts = Concepts::new(None);
        let mut registry = ConceptRegistry::new();
        registry.register(concepts.directory.clone()).unwrap();
        registry.register(concepts.roster.clone()).unwrap();
        registry.register(concepts.notify.clone()).unwrap();
        registry.register(concepts.rotation.clone()).unwrap();
        registry
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/api/Notify/notify"), "Notify/notify");
        assert_eq!(normalize("/Notify/notify"), "Notify/notify");
        assert_eq!(normalize("Notify/notify"), "Notify/notify");
    }

    #[test]
    fn test_routing() {
        let table = PassthroughTable::standard();
        assert!(matches!(
            table.routing("/api/DutyRoster/_getDuty"),
            Routing::Passthrough { .. }
        ));
        assert_eq!(table.routing("DutyRoster/addDuty"), Routing::Gated);
        assert_eq!(table.routing("Auth/login"), Routing::Unlisted);
        assert!(table.is_excluded("/DutyRoster/markDone"));
    }

    #[test]
    fn test_standard_table_covers_every_operation() {
        let table = PassthroughTable::standard();
        let registry = registry();
        assert!(table.unverified_routes(&registry).is_empty());
        assert!(table.stale_routes(&registry).is_empty());
    }

    #[test]
    fn test_reports_unlisted_operations() {
        let mut table = PassthroughTable::default();
        table.exclude("Notify/notify");
        table.exclude("Notify/sendCarrierPigeon");
        let registry = registry();

        let unverified = table.unverified_routes(&registry);
        assert!(unverified.contains(&"Notify/markRead".to_string()));
        assert!(!unverified.contains(&"Notify/notify".to_string()));
        assert_eq!(table.stale_routes(&registry), vec!["Notify/sendCarrierPigeon"]);
    }
}
