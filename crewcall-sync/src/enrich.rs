//! Where-clause enrichment
//!
//! After a sync's `when` patterns match, its `where` stages run in order
//! over the resulting frames. A filter keeps or drops a frame. A query
//! stage maps frame variables to query inputs and each result row to new
//! variables: no rows drops the frame, several rows fan it out. Stages may
//! read concepts and the session store but never write to the action log.

use crate::concept::ConceptRegistry;
use crate::pattern::{Frame, Term};
use crate::session::SessionStore;
use crate::types::{ActionName, Fields, Value};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Collaborators visible to where-stages
pub struct EnrichContext<'a> {
    pub concepts: &'a ConceptRegistry,
    pub sessions: &'a dyn SessionStore,
}

/// Keeps or drops a frame
#[async_trait]
pub trait FrameFilter: Send + Sync {
    fn name(&self) -> &str;

    async fn keep(&self, frame: &Frame, cx: &EnrichContext<'_>) -> bool;
}

/// Produces zero or more rows for a set of inputs
#[async_trait]
pub trait FrameQuery: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, input: &Fields, cx: &EnrichContext<'_>) -> Result<Vec<Fields>, String>;
}

/// A filter backed by a plain predicate over the frame
pub struct ClosureFilter<F>
where
    F: Fn(&Frame) -> bool + Send + Sync,
{
    name: String,
    predicate: F,
}

impl<F> ClosureFilter<F>
where
    F: Fn(&Frame) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

#[async_trait]
impl<F> FrameFilter for ClosureFilter<F>
where
    F: Fn(&Frame) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn keep(&self, frame: &Frame, _cx: &EnrichContext<'_>) -> bool {
        (self.predicate)(frame)
    }
}

/// A concept's read-only query used as a where-stage
#[derive(Debug, Clone)]
pub struct ConceptQuery {
    query: ActionName,
    label: String,
}

impl ConceptQuery {
    pub fn new(query: ActionName) -> Self {
        let label = query.to_string();
        Self { query, label }
    }
}

#[async_trait]
impl FrameQuery for ConceptQuery {
    fn name(&self) -> &str {
        &self.label
    }

    async fn query(&self, input: &Fields, cx: &EnrichContext<'_>) -> Result<Vec<Fields>, String> {
        cx.concepts.query(&self.query, input).await
    }
}

/// A query plus the mapping between frame variables and query fields
#[derive(Clone)]
pub struct QueryStage {
    query: Arc<dyn FrameQuery>,
    inputs: Vec<(String, Term)>,
    outputs: Vec<(String, String)>,
}

impl QueryStage {
    pub fn new(query: Arc<dyn FrameQuery>) -> Self {
        Self {
            query,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Query a concept by action name
    pub fn concept(query: ActionName) -> Self {
        Self::new(Arc::new(ConceptQuery::new(query)))
    }

    /// Pass `term`, evaluated against the frame, as query field `param`
    pub fn input(mut self, param: &str, term: Term) -> Self {
        self.inputs.push((param.to_string(), term));
        self
    }

    /// Bind result field `field` to variable `var`
    pub fn output(mut self, field: &str, var: &str) -> Self {
        self.outputs.push((field.to_string(), var.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        self.query.name()
    }

    pub(crate) fn inputs(&self) -> &[(String, Term)] {
        &self.inputs
    }

    pub(crate) fn outputs(&self) -> &[(String, String)] {
        &self.outputs
    }

    fn query_input(&self, frame: &Frame) -> Fields {
        let mut input = Fields::new();
        for (param, term) in &self.inputs {
            let value = match term {
                Term::Lit(value) => Some(value.clone()),
                Term::Var(name) | Term::Opt(name) => frame.get(name).cloned(),
            };
            if let Some(value) = value.filter(|v| !v.is_null()) {
                input.insert(param.clone(), value);
            }
        }
        input
    }

    async fn run(&self, frame: &Frame, cx: &EnrichContext<'_>) -> Vec<Frame> {
        let input = self.query_input(frame);
        let rows = match self.query.query(&input, cx).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!(query = %self.name(), %error, "where-query failed; dropping frame");
                return Vec::new();
            }
        };
        rows.into_iter()
            .filter_map(|row| {
                let mut next = frame.clone();
                let consistent = self.outputs.iter().all(|(field, var)| {
                    next.bind(var, row.get(field).cloned().unwrap_or(Value::Null))
                });
                consistent.then_some(next)
            })
            .collect()
    }
}

/// One stage of a `where` clause
#[derive(Clone)]
pub enum WhereStage {
    Filter(Arc<dyn FrameFilter>),
    Query(QueryStage),
}

impl WhereStage {
    pub fn name(&self) -> &str {
        match self {
            WhereStage::Filter(filter) => filter.name(),
            WhereStage::Query(stage) => stage.name(),
        }
    }
}

impl fmt::Debug for WhereStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhereStage::Filter(filter) => write!(f, "Filter({})", filter.name()),
            WhereStage::Query(stage) => write!(f, "Query({})", stage.name()),
        }
    }
}

/// Run `stages` in order over a matched frame
pub async fn apply(stages: &[WhereStage], frame: Frame, cx: &EnrichContext<'_>) -> Vec<Frame> {
    let mut frames = vec![frame];
    for stage in stages {
        let mut next = Vec::new();
        for frame in frames {
            match stage {
                WhereStage::Filter(filter) => {
                    if filter.keep(&frame, cx).await {
                        next.push(frame);
                    }
                }
                WhereStage::Query(query) => next.extend(query.run(&frame, cx).await),
            }
        }
        if next.is_empty() {
            return next;
        }
        frames = next;
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{lit, var};
    use crate::session::NoSessions;
    use crewcall_types::fields;
    use serde_json::json;

    struct Rows(Result<Vec<Fields>, String>);

    #[async_trait]
    impl FrameQuery for Rows {
        fn name(&self) -> &str {
            "rows"
        }

        async fn query(&self, _input: &Fields, _cx: &EnrichContext<'_>) -> Result<Vec<Fields>, String> {
            self.0.clone()
        }
    }

    fn cx<'a>(concepts: &'a ConceptRegistry) -> EnrichContext<'a> {
        EnrichContext {
            concepts,
            sessions: &NoSessions,
        }
    }

    fn stage(rows: Result<Vec<Fields>, String>) -> WhereStage {
        WhereStage::Query(
            QueryStage::new(Arc::new(Rows(rows)))
                .input("application", var("application"))
                .output("dutyName", "dutyName"),
        )
    }

    fn start() -> Frame {
        Frame::new().with("application", "a1").unwrap()
    }

    #[tokio::test]
    async fn test_query_fans_out() {
        let concepts = ConceptRegistry::new();
        let rows = vec![
            fields! { "dutyName" => "Setup" },
            fields! { "dutyName" => "Teardown" },
            fields! { "dutyName" => "Snacks" },
        ];
        let frames = apply(&[stage(Ok(rows))], start(), &cx(&concepts)).await;
        let names: Vec<_> = frames.iter().filter_map(|f| f.get_str("dutyName")).collect();
        assert_eq!(names, vec!["Setup", "Teardown", "Snacks"]);
    }

    #[tokio::test]
    async fn test_empty_or_failed_query_drops_frame() {
        let concepts = ConceptRegistry::new();
        assert!(apply(&[stage(Ok(vec![]))], start(), &cx(&concepts)).await.is_empty());
        assert!(apply(&[stage(Err("down".into()))], start(), &cx(&concepts))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_row_is_dropped() {
        let concepts = ConceptRegistry::new();
        let stage = WhereStage::Query(
            QueryStage::new(Arc::new(Rows(Ok(vec![
                fields! { "application" => "a1" },
                fields! { "application" => "a2" },
            ]))))
            .output("application", "application"),
        );
        let frames = apply(&[stage], start(), &cx(&concepts)).await;
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn test_filters_run_in_order() {
        let concepts = ConceptRegistry::new();
        let keep_a1 = WhereStage::Filter(Arc::new(ClosureFilter::new("is-a1", |f: &Frame| {
            f.get_str("application") == Some("a1")
        })));
        let has_duty = WhereStage::Filter(Arc::new(ClosureFilter::new("has-duty", |f: &Frame| {
            f.contains("dutyName")
        })));
        let rows = stage(Ok(vec![fields! { "dutyName" => "Setup" }]));

        let kept = apply(&[keep_a1.clone(), rows, has_duty], start(), &cx(&concepts)).await;
        assert_eq!(kept.len(), 1);

        let other = Frame::new().with("application", "a2").unwrap();
        assert!(apply(&[keep_a1], other, &cx(&concepts)).await.is_empty());
    }

    #[test]
    fn test_query_input_skips_unbound_and_null() {
        let stage = QueryStage::new(Arc::new(Rows(Ok(vec![]))))
            .input("event", var("event"))
            .input("onlyUnread", lit(true))
            .input("user", var("user"));
        let frame = Frame::new().with("event", json!(null)).unwrap();
        assert_eq!(stage.query_input(&frame), fields! { "onlyUnread" => true });
    }
}
