//! Frames: consistent variable bindings accumulated while matching

use crate::types::{ActionId, Fields, Value};
use std::collections::BTreeMap;

/// Variable bindings plus the records that produced them
///
/// A frame holds at most one value per variable. `sources` maps the
/// position of each `when` pattern to the record it matched, which makes
/// the source list ordered and gives the firing key its identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    bindings: BTreeMap<String, Value>,
    sources: BTreeMap<usize, ActionId>,
}

impl Frame {
    /// Create an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a bound value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Get a bound string value
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bind a variable
    ///
    /// Returns `false` when the variable is already bound to a different
    /// value; the frame is then unchanged and must be discarded.
    pub fn bind(&mut self, name: &str, value: Value) -> bool {
        match self.bindings.get(name) {
            Some(existing) => existing == &value,
            None => {
                self.bindings.insert(name.to_string(), value);
                true
            }
        }
    }

    /// Bind a variable, returning the extended frame
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Option<Self> {
        self.bind(name, value.into()).then_some(self)
    }

    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    /// Bindings as a field map, for handing to queries and tests
    pub fn to_fields(&self) -> Fields {
        self.bindings.clone()
    }

    /// Record the record matched at a `when` position
    pub(crate) fn add_source(&mut self, position: usize, id: ActionId) {
        self.sources.insert(position, id);
    }

    /// Whether a record already contributes to this frame
    pub fn uses(&self, id: ActionId) -> bool {
        self.sources.values().any(|used| *used == id)
    }

    /// Contributing records, ordered by `when` position
    pub fn sources(&self) -> Vec<ActionId> {
        self.sources.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conflicting_binding_is_rejected() {
        let mut frame = Frame::new();
        assert!(frame.bind("event", json!("e1")));
        assert!(frame.bind("event", json!("e1")));
        assert!(!frame.bind("event", json!("e2")));
        assert_eq!(frame.get_str("event"), Some("e1"));
    }

    #[test]
    fn test_with_chains() {
        let frame = Frame::new().with("a", 1).and_then(|f| f.with("b", "x"));
        assert_eq!(frame.unwrap().bindings().len(), 2);
        assert!(Frame::new().with("a", 1).and_then(|f| f.with("a", 2)).is_none());
    }

    #[test]
    fn test_sources_are_ordered_by_position() {
        let (a, b) = (ActionId::new(), ActionId::new());
        let mut frame = Frame::new();
        frame.add_source(1, b);
        frame.add_source(0, a);
        assert_eq!(frame.sources(), vec![a, b]);
        assert!(frame.uses(b));
        assert!(!frame.uses(ActionId::new()));
    }
}
