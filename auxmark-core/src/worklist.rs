//! FIFO scanning queue that absorbs document promotion mid-run.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// One unit of scanning work.
///
/// `id` is the identity the document is classified and tagged under;
/// `source` is the path actually read from disk. The two differ only for
/// dry-run promotion, where the canonical identity is queued while the
/// bytes still live at the old path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: PathBuf,
    pub source: PathBuf,
}

impl WorkItem {
    pub fn new(path: PathBuf) -> Self {
        Self {
            source: path.clone(),
            id: path,
        }
    }

    pub fn promoted(id: PathBuf, source: PathBuf) -> Self {
        Self { id, source }
    }
}

/// Strict FIFO queue with at-most-once membership per identity and a
/// retired set for identities replaced by promotion.
///
/// Retired identities can never re-enter the queue for the rest of the
/// run, so a promoted document is only ever scanned under its new name.
#[derive(Debug, Default)]
pub struct Worklist {
    queue: VecDeque<WorkItem>,
    queued: HashSet<PathBuf>,
    retired: HashSet<PathBuf>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(documents: Vec<PathBuf>) -> Self {
        let mut list = Self::default();
        for document in documents {
            list.push(WorkItem::new(document));
        }
        list
    }

    /// Append an item. Returns `false` (dropping the item) when its
    /// identity is already queued or has been retired.
    pub fn push(&mut self, item: WorkItem) -> bool {
        if self.retired.contains(&item.id) || !self.queued.insert(item.id.clone())
        {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        let item = self.queue.pop_front()?;
        self.queued.remove(&item.id);
        Some(item)
    }

    /// Retire an identity replaced by promotion: a still-pending entry is
    /// dropped and the identity is barred from re-admission this run.
    pub fn retire(&mut self, id: &Path) {
        if self.queued.remove(id) {
            self.queue.retain(|item| item.id != id);
        }
        self.retired.insert(id.to_path_buf());
    }

    pub fn is_retired(&self, id: &Path) -> bool {
        self.retired.contains(id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
