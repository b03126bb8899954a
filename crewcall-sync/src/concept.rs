//! Concept adapters
//!
//! A concept is an independent unit of state and behavior. The engine only
//! sees it through this trait: named actions that complete with a success
//! map or an error message, and read-only queries returning rows.

use crate::record::Completion;
use crate::types::{ActionName, Fields, REQUESTING};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Adapter through which syncs invoke and query a concept
#[async_trait]
pub trait Concept: Send + Sync {
    /// Concept name, the `<Concept>` half of an action name
    fn name(&self) -> &str;

    /// Actions this concept accepts
    fn actions(&self) -> &[&'static str];

    /// Read-only queries this concept answers
    fn queries(&self) -> &[&'static str];

    /// Invoke an action. Errors are returned as `Completion::Failure`.
    async fn invoke(&self, action: &str, input: &Fields) -> Completion;

    /// Run a query. Queries never mutate state.
    async fn query(&self, query: &str, input: &Fields) -> Result<Vec<Fields>, String>;

    fn has_action(&self, action: &str) -> bool {
        self.actions().contains(&action)
    }

    fn has_query(&self, query: &str) -> bool {
        self.queries().contains(&query)
    }
}

/// Error raised when registering concepts
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Concept {0} is already registered")]
    Duplicate(String),

    #[error("Concept name {0} is reserved")]
    Reserved(String),
}

/// Concepts available to the engine, by name
#[derive(Clone, Default)]
pub struct ConceptRegistry {
    concepts: BTreeMap<String, Arc<dyn Concept>>,
}

impl ConceptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concept under its own name
    pub fn register(&mut self, concept: Arc<dyn Concept>) -> Result<(), RegistryError> {
        let name = concept.name().to_string();
        if name == REQUESTING {
            return Err(RegistryError::Reserved(name));
        }
        if self.concepts.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.concepts.insert(name, concept);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Concept>> {
        self.concepts.get(name)
    }

    /// Whether `name` is an action of a registered concept
    pub fn has_action(&self, name: &ActionName) -> bool {
        self.get(name.concept())
            .is_some_and(|c| c.has_action(name.action()))
    }

    /// Whether `name` is a query of a registered concept
    pub fn has_query(&self, name: &ActionName) -> bool {
        self.get(name.concept())
            .is_some_and(|c| c.has_query(name.action()))
    }

    /// Invoke an action by fully-qualified name
    ///
    /// Unknown concepts and actions complete as failures so the attempt is
    /// still visible in the log.
    pub async fn invoke(&self, name: &ActionName, input: &Fields) -> Completion {
        match self.get(name.concept()) {
            Some(concept) if concept.has_action(name.action()) => {
                concept.invoke(name.action(), input).await
            }
            _ => Completion::failure(format!("Unknown action {}", name)),
        }
    }

    /// Run a query by fully-qualified name
    pub async fn query(&self, name: &ActionName, input: &Fields) -> Result<Vec<Fields>, String> {
        match self.get(name.concept()) {
            Some(concept) if concept.has_query(name.action()) => {
                concept.query(name.action(), input).await
            }
            _ => Err(format!("Unknown query {}", name)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.concepts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}
