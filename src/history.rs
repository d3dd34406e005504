//! Bounded undo/redo history of full tree snapshots

use std::collections::VecDeque;

use crate::models::TreeData;

/// Maximum number of snapshots kept in `past`
pub const MAX_HISTORY: usize = 50;

/// Two stacks of deep tree copies.
///
/// `past` runs oldest to newest; `future` holds the most recently undone
/// state at its front.
#[derive(Debug, Clone, Default)]
pub struct History {
    past: VecDeque<TreeData>,
    future: VecDeque<TreeData>,
    restoring: bool,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the state from before a mutation and drops the redo stack.
    ///
    /// Returns false when the call was suppressed because a restore is in
    /// progress.
    pub fn snapshot(&mut self, current: &TreeData) -> bool {
        if self.restoring {
            return false;
        }
        self.past.push_back(current.clone());
        if self.past.len() > MAX_HISTORY {
            self.past.pop_front();
        }
        self.future.clear();
        true
    }

    /// Pops the newest past entry, parking `current` on the redo stack
    pub fn undo(&mut self, current: &TreeData) -> Option<TreeData> {
        let previous = self.past.pop_back()?;
        self.future.push_front(current.clone());
        Some(previous)
    }

    /// Pops the newest undone entry, pushing `current` back onto `past`
    pub fn redo(&mut self, current: &TreeData) -> Option<TreeData> {
        let next = self.future.pop_front()?;
        self.past.push_back(current.clone());
        if self.past.len() > MAX_HISTORY {
            self.past.pop_front();
        }
        Some(next)
    }

    /// Suppresses snapshots while a restored state is being installed, so
    /// that undo and redo are never recorded as forward actions.
    pub fn set_restoring(&mut self, restoring: bool) {
        self.restoring = restoring;
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn past_len(&self) -> usize {
        self.past.len()
    }

    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    /// Iterates every stored snapshot, past and future
    pub(crate) fn snapshots(&self) -> impl Iterator<Item = &TreeData> {
        self.past.iter().chain(self.future.iter())
    }
}
