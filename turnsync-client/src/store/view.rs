//! Presentation seam. The store reports every mutation as a [`ViewChange`];
//! a renderer implements [`TranscriptView`] to mirror the store without ever
//! reading it directly.

use super::Entry;

/// Minimal surface a renderer has to provide.
pub trait TranscriptView: Send {
    fn insert(&mut self, index: usize, entry: &Entry);
    fn relocate(&mut self, from: usize, to: usize);
    fn update(&mut self, index: usize, entry: &Entry);
    fn mark_failed(&mut self, index: usize);
    fn remove(&mut self, index: usize);

    /// The active conversation changed; drop everything.
    fn clear(&mut self);
}

/// One store mutation, in the order it happened. Indices refer to the entry
/// list as it was right before the change.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    Inserted { index: usize, entry: Entry },
    Relocated { from: usize, to: usize },
    Updated { index: usize, entry: Entry },
    MarkedFailed { index: usize },
    Removed { index: usize },
    Cleared,
}

impl ViewChange {
    pub fn apply(&self, view: &mut dyn TranscriptView) {
        match self {
            Self::Inserted { index, entry } => view.insert(*index, entry),
            Self::Relocated { from, to } => view.relocate(*from, *to),
            Self::Updated { index, entry } => view.update(*index, entry),
            Self::MarkedFailed { index } => view.mark_failed(*index),
            Self::Removed { index } => view.remove(*index),
            Self::Cleared => view.clear(),
        }
    }
}

/// A view that simply keeps a copy of the entries. Handy for headless use and
/// for checking that the change stream reproduces the store.
#[derive(Debug, Default, Clone)]
pub struct VecView {
    pub entries: Vec<Entry>,
}

impl TranscriptView for VecView {
    fn insert(&mut self, index: usize, entry: &Entry) {
        self.entries.insert(index, entry.clone());
    }

    fn relocate(&mut self, from: usize, to: usize) {
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
    }

    fn update(&mut self, index: usize, entry: &Entry) {
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = entry.clone();
        }
    }

    fn mark_failed(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.mark_failed();
        }
    }

    fn remove(&mut self, index: usize) {
        if index < self.entries.len() {
            self.entries.remove(index);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}
