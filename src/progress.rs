//! Progress tracking across concurrently reconstructed sections.
//!
//! The map of cells is fixed when the tracker is created. Each section owns
//! one cell, so workers never contend on a shared map and no two workers
//! write the same key.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Section, SectionId, SectionState, SectionStatus};

/// Shared handle to one section's status cell.
pub type StatusHandle = Arc<Mutex<SectionStatus>>;

/// Counts of sections per state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Not started.
    pub pending: usize,
    /// Running.
    pub in_progress: usize,
    /// Accepted.
    pub completed: usize,
    /// Last attempt failed.
    pub failed: usize,
}

/// Per-section status cells for one run.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    cells: Arc<BTreeMap<SectionId, StatusHandle>>,
}

impl ProgressTracker {
    /// Create a pending cell for every section.
    pub fn new(sections: &[Section]) -> Self {
        let cells = sections
            .iter()
            .map(|s| (s.id(), Arc::new(Mutex::new(SectionStatus::pending(s.id(), s.kind())))))
            .collect();
        Self { cells: Arc::new(cells) }
    }

    /// Handle to one section's cell.
    pub fn handle(&self, id: SectionId) -> Option<StatusHandle> {
        self.cells.get(&id).cloned()
    }

    /// Copy of one section's status.
    pub fn status(&self, id: SectionId) -> Option<SectionStatus> {
        self.cells.get(&id).map(|cell| cell.lock().clone())
    }

    /// Copy of every status, in section order.
    pub fn snapshot(&self) -> BTreeMap<SectionId, SectionStatus> {
        self.cells
            .iter()
            .map(|(id, cell)| (*id, cell.lock().clone()))
            .collect()
    }

    /// Count sections per state.
    pub fn summary(&self) -> ProgressSummary {
        let mut summary = ProgressSummary::default();
        for cell in self.cells.values() {
            match cell.lock().state {
                SectionState::Pending => summary.pending += 1,
                SectionState::InProgress => summary.in_progress += 1,
                SectionState::Completed(_) => summary.completed += 1,
                SectionState::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Number of tracked sections.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no sections are tracked.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::DocumentPartitioner;
    use crate::types::{Document, Metadata, Node, NodeKind, Position, SectionOutput};

    fn tracker() -> ProgressTracker {
        let doc = Document::new(
            Metadata::new("acme", "triage", "1.0.0"),
            vec![Node::new("node-1", NodeKind::Question, Position::default())],
            vec![],
        );
        ProgressTracker::new(&DocumentPartitioner::default().partition(&doc, &[]))
    }

    #[test]
    fn test_all_pending_initially() {
        let tracker = tracker();
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.summary(), ProgressSummary { pending: 2, ..Default::default() });
        assert!(tracker.handle(SectionId::new(7)).is_none());
    }

    #[test]
    fn test_handles_share_cells() {
        let tracker = tracker();
        let metadata = SectionId::new(0);
        let handle = tracker.handle(metadata).unwrap();
        {
            let mut status = handle.lock();
            status.start().unwrap();
            status.fail("timeout").unwrap();
        }
        assert_eq!(tracker.status(metadata).unwrap().error(), Some("timeout"));

        let clone = tracker.clone();
        {
            let mut status = handle.lock();
            status.retry().unwrap();
            status.complete(SectionOutput::Metadata(Metadata::new("acme", "triage", "1.0.1"))).unwrap();
        }
        let snapshot = clone.snapshot();
        assert!(snapshot[&metadata].is_completed());
        assert_eq!(snapshot[&metadata].retry_count, 1);
        assert_eq!(clone.summary().completed, 1);
    }
}
