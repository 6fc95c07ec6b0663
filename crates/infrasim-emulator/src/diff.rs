//! What an `upsert_topology` call changed.

use serde::{Deserialize, Serialize};

/// A node whose engine could not be built or reconfigured. The previous
/// engine, if any, is left in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedNode {
    pub id: String,
    pub reason: String,
}

/// Component ids grouped by what happened to their engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDiff {
    /// New engines.
    pub created: Vec<String>,
    /// Engines that took a config change in place, state kept.
    pub reconfigured: Vec<String>,
    /// Engines replaced by a fresh one (identity change or new kind).
    pub rebuilt: Vec<String>,
    /// Engines disposed because their node left the topology or stopped
    /// being eligible.
    pub removed: Vec<String>,
    pub failed: Vec<FailedNode>,
}

impl TopologyDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.reconfigured.is_empty()
            && self.rebuilt.is_empty()
            && self.removed.is_empty()
            && self.failed.is_empty()
    }

    /// Number of engines that changed.
    pub fn changes(&self) -> usize {
        self.created.len() + self.reconfigured.len() + self.rebuilt.len() + self.removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diff() {
        let diff = TopologyDiff::default();
        assert!(diff.is_empty());
        assert_eq!(diff.changes(), 0);
    }

    #[test]
    fn failures_are_not_changes() {
        let diff = TopologyDiff {
            created: vec!["a".into()],
            failed: vec![FailedNode {
                id: "b".into(),
                reason: "bad".into(),
            }],
            ..TopologyDiff::default()
        };
        assert!(!diff.is_empty());
        assert_eq!(diff.changes(), 1);
    }
}
