use std::collections::VecDeque;

use crate::document::DocumentSnapshot;

/// Undo/redo storage consumed by the editor. The editor records the state
/// before each committed change and asks for the state to restore on
/// undo/redo; it never inspects the stack itself.
pub trait History {
    fn record(&mut self, before: DocumentSnapshot);
    /// Takes the state to restore, stashing `current` for redo.
    fn undo(&mut self, current: DocumentSnapshot) -> Option<DocumentSnapshot>;
    fn redo(&mut self, current: DocumentSnapshot) -> Option<DocumentSnapshot>;
    fn can_undo(&self) -> bool;
    fn can_redo(&self) -> bool;
    fn clear(&mut self);
}

/// Bounded stack of whole-document snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    capacity: usize,
    undo: VecDeque<DocumentSnapshot>,
    redo: Vec<DocumentSnapshot>,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            undo: VecDeque::new(),
            redo: Vec::new(),
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}

impl History for SnapshotHistory {
    fn record(&mut self, before: DocumentSnapshot) {
        self.undo.push_back(before);
        if self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
        self.redo.clear();
    }

    fn undo(&mut self, current: DocumentSnapshot) -> Option<DocumentSnapshot> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    fn redo(&mut self, current: DocumentSnapshot) -> Option<DocumentSnapshot> {
        let next = self.redo.pop()?;
        self.undo.push_back(current);
        Some(next)
    }

    fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
