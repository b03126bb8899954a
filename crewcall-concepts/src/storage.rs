//! In-memory versioned document collections
//!
//! Every document carries a version that increases on each write. Writers
//! read a document, check their preconditions, then commit with
//! [`Collection::update_if`], which fails with `Conflict` if another writer
//! got there first. This keeps read-check-write sequences atomic without
//! holding a lock across the check.

use crate::error::{ConceptError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Fresh document identifier
pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// A document and its version
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub doc: T,
}

struct Entry<T> {
    seq: u64,
    version: u64,
    doc: T,
}

struct Inner<T> {
    docs: HashMap<String, Entry<T>>,
    next_seq: u64,
}

/// A named collection of documents keyed by id
pub struct Collection<T> {
    name: &'static str,
    inner: RwLock<Inner<T>>,
}

impl<T: Clone> Collection<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(Inner {
                docs: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert a new document at version 1
    pub fn insert(&self, id: &str, doc: T) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.docs.contains_key(id) {
            return Err(ConceptError::Conflict(format!(
                "{} document {} already exists",
                self.name, id
            )));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.docs.insert(id.to_string(), Entry { seq, version: 1, doc });
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Versioned<T>> {
        self.inner.read().docs.get(id).map(|e| Versioned {
            version: e.version,
            doc: e.doc.clone(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().docs.contains_key(id)
    }

    /// Documents matching `pred`, in insertion order
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        let inner = self.inner.read();
        let mut found: Vec<_> = inner.docs.values().filter(|e| pred(&e.doc)).collect();
        found.sort_by_key(|e| e.seq);
        found.into_iter().map(|e| e.doc.clone()).collect()
    }

    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.inner.read().docs.values().any(|e| pred(&e.doc))
    }

    /// Apply `f` if the document is still at `expected` version
    ///
    /// Returns the new version.
    pub fn update_if(&self, id: &str, expected: u64, f: impl FnOnce(&mut T)) -> Result<u64> {
        let mut inner = self.inner.write();
        let entry = inner.docs.get_mut(id).ok_or_else(|| self.missing(id))?;
        if entry.version != expected {
            return Err(self.conflict(id));
        }
        f(&mut entry.doc);
        entry.version += 1;
        Ok(entry.version)
    }

    /// Remove the document if it is still at `expected` version
    pub fn delete_if(&self, id: &str, expected: u64) -> Result<T> {
        let mut inner = self.inner.write();
        let version = inner
            .docs
            .get(id)
            .map(|e| e.version)
            .ok_or_else(|| self.missing(id))?;
        if version != expected {
            return Err(self.conflict(id));
        }
        inner
            .docs
            .remove(id)
            .map(|e| e.doc)
            .ok_or_else(|| self.missing(id))
    }

    /// Remove every document matching `pred`; returns how many were removed
    pub fn delete_where(&self, pred: impl Fn(&T) -> bool) -> usize {
        let mut inner = self.inner.write();
        let before = inner.docs.len();
        inner.docs.retain(|_, e| !pred(&e.doc));
        before - inner.docs.len()
    }

    /// Update the first document matching `pred`, or insert a new one,
    /// as one atomic step
    pub fn upsert_where(
        &self,
        pred: impl Fn(&T) -> bool,
        update: impl FnOnce(&mut T),
        insert: impl FnOnce() -> (String, T),
    ) {
        let mut inner = self.inner.write();
        let existing = inner
            .docs
            .iter()
            .filter(|(_, e)| pred(&e.doc))
            .min_by_key(|(_, e)| e.seq)
            .map(|(id, _)| id.clone());
        if let Some(entry) = existing.as_deref().and_then(|id| inner.docs.get_mut(id)) {
            update(&mut entry.doc);
            entry.version += 1;
            return;
        }
        let (id, doc) = insert();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.docs.insert(id, Entry { seq, version: 1, doc });
    }

    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn missing(&self, id: &str) -> ConceptError {
        ConceptError::NotFound(format!("{} document {} not found", self.name, id))
    }

    fn conflict(&self, id: &str) -> ConceptError {
        debug!(collection = self.name, id, "stale write rejected");
        ConceptError::Conflict(format!(
            "{} document {} was modified concurrently",
            self.name, id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_if_detects_stale_version() {
        let docs = Collection::new("duties");
        docs.insert("d1", 1u32).unwrap();
        let read = docs.get("d1").unwrap();

        assert_eq!(docs.update_if("d1", read.version, |n| *n += 1), Ok(2));
        let stale = docs.update_if("d1", read.version, |n| *n += 10);
        assert!(matches!(stale, Err(ConceptError::Conflict(_))));
        assert_eq!(docs.get("d1").unwrap().doc, 2);
    }

    #[test]
    fn test_find_keeps_insertion_order() {
        let docs = Collection::new("names");
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            docs.insert(&i.to_string(), name.to_string()).unwrap();
        }
        assert_eq!(docs.find(|_| true), vec!["c", "a", "b"]);
        assert_eq!(docs.delete_where(|n| n == "a"), 1);
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_delete_if_and_duplicate_insert() {
        let docs = Collection::new("events");
        docs.insert("e1", ()).unwrap();
        assert!(docs.insert("e1", ()).is_err());
        assert!(matches!(docs.delete_if("e1", 7), Err(ConceptError::Conflict(_))));
        docs.delete_if("e1", 1).unwrap();
        assert!(matches!(docs.delete_if("e1", 1), Err(ConceptError::NotFound(_))));
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let docs: Collection<(String, u8)> = Collection::new("memberships");
        let insert = || ("m1".to_string(), ("u1".to_string(), 1));
        docs.upsert_where(|m| m.0 == "u1", |m| m.1 = 9, insert);
        docs.upsert_where(|m| m.0 == "u1", |m| m.1 = 2, insert);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.get("m1").unwrap(), Versioned { version: 2, doc: ("u1".to_string(), 2) });
    }
}
