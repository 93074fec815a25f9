//! Undo/redo history over whole-document snapshots.
//!
//! Recording a new edit clears the redo stack. Consecutive edits sharing a
//! group id coalesce into one undo step (the snapshot kept is the earliest
//! of the group, so undo restores the state before the whole group). The
//! undo stack is depth-bounded; the oldest step falls off first.

use std::collections::VecDeque;

use crate::document::model::{DocumentNode, Selection};

pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// One restorable editor state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub document: DocumentNode,
    pub selection: Option<Selection>,
}

impl Snapshot {
    pub fn new(document: DocumentNode, selection: Option<Selection>) -> Self {
        Self {
            document,
            selection,
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    snapshot: Snapshot,
    group_id: Option<String>,
}

/// Bounded undo/redo stacks.
#[derive(Debug)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<Snapshot>,
    max_depth: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Records the pre-edit snapshot of a new edit.
    pub fn record(&mut self, snapshot: Snapshot, group_id: Option<&str>) {
        self.redo.clear();
        if let Some(group) = group_id {
            if self
                .undo
                .back()
                .is_some_and(|top| top.group_id.as_deref() == Some(group))
            {
                // Coalesced into the open group; the group's first snapshot
                // already covers this edit.
                return;
            }
        }
        self.undo.push_back(HistoryEntry {
            snapshot,
            group_id: group_id.map(str::to_string),
        });
        while self.undo.len() > self.max_depth {
            self.undo.pop_front();
        }
    }

    /// Pops the most recent undo step, exchanging it for the current state.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let entry = self.undo.pop_back()?;
        self.redo.push(current);
        Some(entry.snapshot)
    }

    /// Pops the most recent redo step, exchanging it for the current state.
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let snapshot = self.redo.pop()?;
        self.undo.push_back(HistoryEntry {
            snapshot: current,
            group_id: None,
        });
        Some(snapshot)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.undo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::{BlockNode, InlineNode};

    fn snap(text: &str) -> Snapshot {
        let mut doc = DocumentNode::new();
        doc.children
            .push(BlockNode::paragraph(vec![InlineNode::text(text)]));
        Snapshot::new(doc, None)
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = History::new();
        history.record(snap("v1"), None);
        assert!(history.can_undo());
        assert!(!history.can_redo());

        let restored = history.undo(snap("v2")).expect("undo");
        assert_eq!(restored.document.children[0].text(), "v1");
        assert!(history.can_redo());

        let forward = history.redo(snap("v1")).expect("redo");
        assert_eq!(forward.document.children[0].text(), "v2");
        assert!(history.can_undo());
    }

    #[test]
    fn test_undo_empty_returns_none() {
        let mut history = History::new();
        assert!(history.undo(snap("x")).is_none());
        assert!(history.redo(snap("x")).is_none());
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let mut history = History::new();
        history.record(snap("v1"), None);
        let _ = history.undo(snap("v2"));
        assert!(history.can_redo());
        history.record(snap("v3"), None);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_grouped_edits_coalesce_to_one_step() {
        let mut history = History::new();
        history.record(snap("before"), Some("typing-1"));
        history.record(snap("mid"), Some("typing-1"));
        history.record(snap("later"), Some("typing-2"));
        assert_eq!(history.depth(), 2);

        let restored = history.undo(snap("now")).expect("undo");
        assert_eq!(restored.document.children[0].text(), "later");
        let restored = history.undo(snap("later")).expect("undo");
        // The group restores its earliest snapshot.
        assert_eq!(restored.document.children[0].text(), "before");
    }

    #[test]
    fn test_depth_bound_evicts_oldest() {
        let mut history = History::with_depth(3);
        for i in 0..5 {
            history.record(snap(&format!("v{}", i)), None);
        }
        assert_eq!(history.depth(), 3);
        let _ = history.undo(snap("now"));
        let _ = history.undo(snap("v4"));
        let restored = history.undo(snap("v3")).expect("undo");
        assert_eq!(restored.document.children[0].text(), "v2");
        assert!(!history.can_undo());
    }
}
