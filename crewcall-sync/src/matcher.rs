//! The matcher
//!
//! Given a freshly completed record, find every sync that mentions its
//! action and every consistent way of completing that sync's `when` clause
//! with completed records of the same flow. The new record must take part
//! in each match; the other positions are joined against the log. No
//! combination is pruned early: every consistent frame is returned.

use crate::log::ActionLog;
use crate::pattern::Frame;
use crate::record::ActionRecord;
use crate::rule::{SyncRegistry, SyncRule};
use crate::types::ActionId;
use std::sync::Arc;

/// Identity of one firing: the sync and the records, by `when` position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FiringKey {
    pub sync: String,
    pub records: Vec<ActionId>,
}

/// A sync whose `when` clause is satisfied by a frame
#[derive(Debug, Clone)]
pub struct Match {
    pub sync: Arc<SyncRule>,
    pub frame: Frame,
}

impl Match {
    pub fn key(&self) -> FiringKey {
        FiringKey {
            sync: self.sync.name().to_string(),
            records: self.frame.sources(),
        }
    }
}

/// Every match the completion of `record` makes possible
pub fn matches_for(log: &ActionLog, syncs: &SyncRegistry, record: &ActionRecord) -> Vec<Match> {
    let mut matches = Vec::new();
    for sync in syncs.triggered_by(&record.action) {
        for frame in join(log, sync, record) {
            matches.push(Match {
                sync: sync.clone(),
                frame,
            });
        }
    }
    matches
}

fn join(log: &ActionLog, sync: &SyncRule, record: &ActionRecord) -> Vec<Frame> {
    let when = sync.when();
    let mut results = Vec::new();

    for (anchor, pattern) in when.iter().enumerate() {
        let Some(mut seed) = pattern.unify(record, &Frame::new()) else {
            continue;
        };
        seed.add_source(anchor, record.id);

        let mut frames = vec![seed];
        for (position, other) in when.iter().enumerate() {
            if position == anchor {
                continue;
            }
            let candidates = log.completed_in_flow(record.flow, &other.action);
            let mut next = Vec::new();
            for frame in &frames {
                for candidate in &candidates {
                    if frame.uses(candidate.id) {
                        continue;
                    }
                    if let Some(mut extended) = other.unify(candidate, frame) {
                        extended.add_source(position, candidate.id);
                        next.push(extended);
                    }
                }
            }
            frames = next;
            if frames.is_empty() {
                break;
            }
        }
        results.extend(frames);
    }
    results
}
