use std::collections::{BTreeSet, HashSet};

/// Local change bookkeeping: `created` and `modified` never share a path, and a path
/// pending deletion is in neither.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeTracker {
    created: BTreeSet<String>,
    modified: BTreeSet<String>,
    pending_deletion: BTreeSet<String>,
}

impl ChangeTracker {
    pub fn is_created(&self, path: &str) -> bool {
        self.created.contains(path)
    }

    pub fn is_modified(&self, path: &str) -> bool {
        self.modified.contains(path)
    }

    pub fn is_pending_deletion(&self, path: &str) -> bool {
        self.pending_deletion.contains(path)
    }

    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.created.iter().map(String::as_str)
    }

    pub fn modified(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    pub fn pending_deletion(&self) -> impl Iterator<Item = &str> {
        self.pending_deletion.iter().map(String::as_str)
    }

    /// Records a local create. Recreating a path that is pending deletion takes it
    /// out of the suppression set.
    pub fn mark_created(&mut self, path: &str) {
        self.pending_deletion.remove(path);
        self.modified.remove(path);
        self.created.insert(path.to_string());
    }

    /// Records a local edit of a remote-backed path. Created paths stay `created`.
    pub fn mark_modified(&mut self, path: &str) -> bool {
        if self.created.contains(path) || self.pending_deletion.contains(path) {
            return false;
        }
        self.modified.insert(path.to_string())
    }

    pub fn clear_modified(&mut self, path: &str) {
        self.modified.remove(path);
    }

    /// Moves `path` into the suppression set; false when it was already pending.
    pub fn mark_pending_deletion(&mut self, path: &str) -> bool {
        self.created.remove(path);
        self.modified.remove(path);
        self.pending_deletion.insert(path.to_string())
    }

    /// Drops every pending deletion the remote listing no longer contains.
    pub fn confirm_deletions(&mut self, remote_paths: &HashSet<&str>) -> Vec<String> {
        let confirmed: Vec<String> = self
            .pending_deletion
            .iter()
            .filter(|path| !remote_paths.contains(path.as_str()))
            .cloned()
            .collect();
        for path in &confirmed {
            self.pending_deletion.remove(path);
        }
        confirmed
    }

    pub fn clear_synced(&mut self, path: &str) {
        self.created.remove(path);
        self.modified.remove(path);
    }

    pub fn unsynced(&self) -> BTreeSet<String> {
        self.created.union(&self.modified).cloned().collect()
    }

    pub fn has_unsynced(&self) -> bool {
        !self.created.is_empty() || !self.modified.is_empty()
    }

    pub fn reset(&mut self) {
        self.created.clear();
        self.modified.clear();
        self.pending_deletion.clear();
    }
}
