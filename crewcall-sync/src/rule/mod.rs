//! Synchronizations: declarative `when / where / then` rules
//!
//! A sync fires when every `when` pattern matches a completed record of the
//! same flow with consistent bindings. Its `where` stages enrich or prune
//! the frame, and each `then` template becomes an action invocation.
//!
//! ```
//! use crewcall_sync::pattern::{lit, var, Pattern};
//! use crewcall_sync::rule::{ActionTemplate, SyncBuilder};
//!
//! let sync = SyncBuilder::new("Notify_request")
//!     .when(
//!         Pattern::new("Requesting.request".parse().unwrap())
//!             .input("path", lit("Notify/notify"))
//!             .inputs(&["recipient", "subject", "body"])
//!             .output("request", var("request")),
//!     )
//!     .then(ActionTemplate::new("Notify.notify".parse().unwrap()).binds(&[
//!         "recipient",
//!         "subject",
//!         "body",
//!     ]))
//!     .build()
//!     .unwrap();
//! assert_eq!(sync.name(), "Notify_request");
//! ```

mod registry;

pub use registry::SyncRegistry;

use crate::enrich::{FrameFilter, QueryStage, WhereStage};
use crate::pattern::{var, Frame, Pattern, Term};
use crate::types::{ActionName, Fields};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building or instantiating syncs
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("sync {0} has no when patterns")]
    EmptyWhen(String),

    #[error("sync {0} has no then actions")]
    EmptyThen(String),

    #[error("sync {sync}: variable ?{var} is never bound")]
    UnboundVariable { sync: String, var: String },

    #[error("sync {0} is already registered")]
    Duplicate(String),
}

/// An action to dispatch, with fields drawn from the frame
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTemplate {
    pub action: ActionName,
    pub fields: Vec<(String, Term)>,
}

impl ActionTemplate {
    pub fn new(action: ActionName) -> Self {
        Self {
            action,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, term: Term) -> Self {
        self.fields.push((name.to_string(), term));
        self
    }

    /// Pass each named variable as the field of the same name
    pub fn binds(mut self, names: &[&str]) -> Self {
        for name in names {
            self.fields.push((name.to_string(), var(name)));
        }
        self
    }

    /// Build the concrete input map for one frame
    ///
    /// Fails with the name of the first required variable the frame does
    /// not bind. Optional variables that are unbound or null are omitted.
    pub fn instantiate(&self, frame: &Frame) -> Result<Fields, String> {
        let mut input = Fields::new();
        for (field, term) in &self.fields {
            match term {
                Term::Lit(value) => {
                    input.insert(field.clone(), value.clone());
                }
                Term::Var(name) => {
                    let value = frame.get(name).ok_or_else(|| name.clone())?;
                    input.insert(field.clone(), value.clone());
                }
                Term::Opt(name) => {
                    if let Some(value) = frame.get(name).filter(|v| !v.is_null()) {
                        input.insert(field.clone(), value.clone());
                    }
                }
            }
        }
        Ok(input)
    }
}

/// A registered synchronization. Immutable once built.
#[derive(Debug, Clone)]
pub struct SyncRule {
    name: String,
    when: Vec<Pattern>,
    stages: Vec<WhereStage>,
    then: Vec<ActionTemplate>,
}

impl SyncRule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn when(&self) -> &[Pattern] {
        &self.when
    }

    pub fn stages(&self) -> &[WhereStage] {
        &self.stages
    }

    pub fn then(&self) -> &[ActionTemplate] {
        &self.then
    }

    /// Distinct actions mentioned by the `when` clause
    pub fn triggers(&self) -> BTreeSet<&ActionName> {
        self.when.iter().map(|p| &p.action).collect()
    }
}

/// Fluent builder for [`SyncRule`]
#[derive(Debug, Clone)]
pub struct SyncBuilder {
    name: String,
    when: Vec<Pattern>,
    stages: Vec<WhereStage>,
    then: Vec<ActionTemplate>,
}

impl SyncBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            when: Vec::new(),
            stages: Vec::new(),
            then: Vec::new(),
        }
    }

    pub fn when(mut self, pattern: Pattern) -> Self {
        self.when.push(pattern);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn FrameFilter>) -> Self {
        self.stages.push(WhereStage::Filter(filter));
        self
    }

    pub fn query(mut self, stage: QueryStage) -> Self {
        self.stages.push(WhereStage::Query(stage));
        self
    }

    pub fn then(mut self, template: ActionTemplate) -> Self {
        self.then.push(template);
        self
    }

    /// Validate and freeze the sync
    pub fn build(self) -> Result<SyncRule, SyncError> {
        if self.when.is_empty() {
            return Err(SyncError::EmptyWhen(self.name));
        }
        if self.then.is_empty() {
            return Err(SyncError::EmptyThen(self.name));
        }

        let mut bound: BTreeSet<&str> = self.when.iter().flat_map(Pattern::variables).collect();
        let unbound = |var: &str| SyncError::UnboundVariable {
            sync: self.name.clone(),
            var: var.to_string(),
        };

        for stage in &self.stages {
            if let WhereStage::Query(query) = stage {
                for (_, term) in query.inputs() {
                    if let Term::Var(name) = term {
                        if !bound.contains(name.as_str()) {
                            return Err(unbound(name));
                        }
                    }
                }
                bound.extend(query.outputs().iter().map(|(_, var)| var.as_str()));
            }
        }

        for template in &self.then {
            for (_, term) in &template.fields {
                if let Term::Var(name) = term {
                    if !bound.contains(name.as_str()) {
                        return Err(unbound(name));
                    }
                }
            }
        }

        Ok(SyncRule {
            name: self.name,
            when: self.when,
            stages: self.stages,
            then: self.then,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{lit, opt};
    use crewcall_types::fields;
    use serde_json::json;

    fn request() -> Pattern {
        Pattern::new("Requesting.request".parse().unwrap())
            .input("path", lit("DutyRoster/markDone"))
            .inputs(&["duty", "actor"])
            .output("request", var("request"))
    }

    fn mark_done() -> ActionTemplate {
        ActionTemplate::new("DutyRoster.markDone".parse().unwrap()).binds(&["duty", "actor"])
    }

    #[test]
    fn test_build_valid_sync() {
        let sync = SyncBuilder::new("markDone")
            .when(request())
            .then(mark_done())
            .build()
            .unwrap();
        assert_eq!(sync.triggers().len(), 1);
        assert_eq!(sync.then().len(), 1);
    }

    #[test]
    fn test_build_rejects_empty_clauses() {
        assert_eq!(
            SyncBuilder::new("x").then(mark_done()).build().unwrap_err(),
            SyncError::EmptyWhen("x".into())
        );
        assert_eq!(
            SyncBuilder::new("x").when(request()).build().unwrap_err(),
            SyncError::EmptyThen("x".into())
        );
    }

    #[test]
    fn test_build_rejects_unbound_then_variable() {
        let err = SyncBuilder::new("x")
            .when(request())
            .then(mark_done().field("assignee", var("assignee")))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::UnboundVariable {
                sync: "x".into(),
                var: "assignee".into()
            }
        );
    }

    #[test]
    fn test_query_outputs_count_as_bound() {
        let sync = SyncBuilder::new("x")
            .when(request())
            .query(
                QueryStage::concept("DutyRoster._getDuty".parse().unwrap())
                    .input("duty", var("duty"))
                    .output("title", "title"),
            )
            .then(mark_done().field("title", var("title")))
            .build();
        assert!(sync.is_ok());
    }

    #[test]
    fn test_instantiate_omits_unbound_optionals() {
        let template = ActionTemplate::new("DutyRoster.updateDuty".parse().unwrap())
            .binds(&["duty"])
            .field("title", opt("title"))
            .field("dueAt", opt("dueAt"))
            .field("source", lit("sync"));
        let frame = Frame::new()
            .with("duty", "d1")
            .and_then(|f| f.with("dueAt", json!(null)))
            .unwrap();
        assert_eq!(
            template.instantiate(&frame).unwrap(),
            fields! { "duty" => "d1", "source" => "sync" }
        );
        assert_eq!(template.instantiate(&Frame::new()), Err("duty".to_string()));
    }
}
