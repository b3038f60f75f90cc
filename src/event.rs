//! File change events and the coalescing rules applied while debouncing them.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Changed => write!(f, "changed"),
            ChangeKind::Removed => write!(f, "removed"),
        }
    }
}

/// Root-relative path (forward slashes) to its coalesced change.
pub type ChangeBatch = BTreeMap<String, ChangeKind>;

/// Outcome of folding a new event into an existing one. `None` drops the entry.
pub fn coalesce(existing: ChangeKind, incoming: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;
    match (existing, incoming) {
        // A file that appeared and vanished inside one window never existed for us.
        (Added, Removed) => None,
        (Added, _) => Some(Added),
        (Changed, Removed) => Some(Removed),
        (Changed, Added) => Some(Added),
        (Changed, Changed) => Some(Changed),
        (Removed, Added) => Some(Added),
        (Removed, _) => Some(Removed),
    }
}

/// Changes accumulated during one debounce window.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingChanges(ChangeBatch);

impl PendingChanges {
    pub fn new() -> Self {
        PendingChanges::default()
    }

    pub fn record(&mut self, path: String, kind: ChangeKind) {
        match self.0.remove(&path) {
            None => {
                self.0.insert(path, kind);
            }
            Some(existing) => {
                if let Some(merged) = coalesce(existing, kind) {
                    self.0.insert(path, merged);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<ChangeKind> {
        self.0.get(path).copied()
    }

    /// Take everything recorded so far, leaving this empty.
    pub fn take(&mut self) -> ChangeBatch {
        std::mem::take(&mut self.0)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
