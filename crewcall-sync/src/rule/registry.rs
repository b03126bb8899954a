//! Sync registry, indexed by trigger action

use super::{SyncError, SyncRule};
use crate::types::ActionName;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// The fixed set of syncs known to an engine
#[derive(Debug, Clone, Default)]
pub struct SyncRegistry {
    syncs: Vec<Arc<SyncRule>>,
    by_trigger: HashMap<ActionName, Vec<usize>>,
    names: BTreeSet<String>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sync. Names must be unique.
    pub fn register(&mut self, sync: SyncRule) -> Result<(), SyncError> {
        if !self.names.insert(sync.name().to_string()) {
            return Err(SyncError::Duplicate(sync.name().to_string()));
        }
        let index = self.syncs.len();
        for action in sync.triggers() {
            self.by_trigger.entry(action.clone()).or_default().push(index);
        }
        self.syncs.push(Arc::new(sync));
        Ok(())
    }

    /// Syncs whose `when` clause mentions `action`
    pub fn triggered_by<'a>(&'a self, action: &ActionName) -> impl Iterator<Item = &'a Arc<SyncRule>> + 'a {
        self.by_trigger
            .get(action)
            .into_iter()
            .flatten()
            .map(move |&i| &self.syncs[i])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SyncRule>> {
        self.syncs.iter().find(|s| s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SyncRule>> {
        self.syncs.iter()
    }

    pub fn len(&self) -> usize {
        self.syncs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syncs.is_empty()
    }
}
