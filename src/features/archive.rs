//! Local bookkeeping of which recipients the caller considers archived.
//!
//! The registry is the dispatcher's only source of truth for the archive
//! bit. It never consults or updates the transport, and it is not persisted.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct ArchiveRegistry {
    ids: RwLock<HashSet<String>>,
}

impl ArchiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.ids.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        self.ids.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or removes one id. Returns whether membership changed.
    pub fn set(&self, id: &str, archived: bool) -> bool {
        let mut ids = self.write();
        if archived {
            ids.insert(id.to_string())
        } else {
            ids.remove(id)
        }
    }

    /// Replaces the whole set in one step.
    pub fn replace_all<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh: HashSet<String> = ids.into_iter().map(Into::into).collect();
        *self.write() = fresh;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains(id)
    }

    /// Sorted copy of the current members.
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
