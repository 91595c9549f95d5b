use std::collections::{BTreeMap, HashSet};

use modforge_core::{EntryKind, FileEntry};
use tracing::debug;

use super::WorkspaceError;
use super::mirror::LocalMirror;
use super::paths;
use super::reconcile::{self, TreeNode, TreeView};
use super::tracker::ChangeTracker;

/// A remote delete the caller has to issue after the state was updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteJob {
    pub path: String,
    /// Best known content hash; `None` means it has to be looked up first.
    pub hash: Option<String>,
}

/// Synchronous session state. Every method is a single in-memory update followed by
/// a reconciliation pass, so the view never lags behind a local mutation.
#[derive(Debug)]
pub struct WorkspaceState {
    snapshot: BTreeMap<String, FileEntry>,
    mirror: LocalMirror,
    tracker: ChangeTracker,
    expanded: HashSet<String>,
    active: Option<String>,
    view: TreeView,
}

impl WorkspaceState {
    pub fn new(mirror_capacity: Option<usize>) -> Self {
        Self {
            snapshot: BTreeMap::new(),
            mirror: LocalMirror::new(mirror_capacity),
            tracker: ChangeTracker::default(),
            expanded: HashSet::new(),
            active: None,
            view: TreeView::default(),
        }
    }

    pub fn view(&self) -> &TreeView {
        &self.view
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Replaces the remote snapshot wholesale and reconciles.
    pub fn apply_snapshot(&mut self, entries: Vec<FileEntry>) {
        self.snapshot = entries
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect();

        let listed: Vec<FileEntry> = self.snapshot.values().cloned().collect();
        let confirmed = reconcile::confirm_deletions(&listed, &mut self.tracker);
        if !confirmed.is_empty() {
            debug!(count = confirmed.len(), "remote deletions confirmed");
        }
        self.drop_stale_clean_entries();
        self.reconcile();
    }

    /// Clears every local override after a push and reconciles against `entries`,
    /// or against the previous snapshot when the re-listing failed.
    pub fn hard_reset(&mut self, entries: Option<Vec<FileEntry>>) {
        self.mirror.clear();
        self.tracker.reset();
        self.active = None;
        match entries {
            Some(entries) => self.apply_snapshot(entries),
            None => self.reconcile(),
        }
    }

    pub fn reconcile(&mut self) {
        let listed: Vec<FileEntry> = self.snapshot.values().cloned().collect();
        self.view = reconcile::reconcile(&listed, &self.tracker, &self.expanded);
    }

    pub fn toggle_expanded(&mut self, path: &str) -> bool {
        let now_expanded = if self.expanded.remove(path) {
            false
        } else {
            self.expanded.insert(path.to_string());
            true
        };
        self.reconcile();
        now_expanded
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.view.find(path).is_some_and(TreeNode::is_directory)
    }

    /// Content already mirrored for `path`; marks it active.
    pub fn open_cached(&mut self, path: &str) -> Option<String> {
        let content = self.mirror.content(path)?.to_string();
        self.mirror.touch(path);
        self.active = Some(path.to_string());
        Some(content)
    }

    /// Stores a fetched blob unless local state moved on while the read was in flight.
    pub fn finish_open(
        &mut self,
        path: &str,
        content: String,
        hash: Option<String>,
    ) -> Result<String, WorkspaceError> {
        if self.tracker.is_pending_deletion(path) {
            return Err(WorkspaceError::NotFound(path.to_string()));
        }
        if let Some(existing) = self.open_cached(path) {
            return Ok(existing);
        }
        self.mirror.insert_fetched(path, content.clone(), hash);
        self.active = Some(path.to_string());
        self.evict();
        Ok(content)
    }

    pub fn edit(&mut self, path: &str, content: String) -> Result<(), WorkspaceError> {
        if self.is_directory(path) {
            return Err(WorkspaceError::IsDirectory(path.to_string()));
        }
        let dirty = self
            .mirror
            .set_content(path, content)
            .map(|entry| entry.is_dirty())
            .ok_or_else(|| WorkspaceError::NotOpen(path.to_string()))?;
        if !self.tracker.is_created(path) {
            if dirty {
                self.tracker.mark_modified(path);
            } else {
                self.tracker.clear_modified(path);
            }
        }
        self.reconcile();
        Ok(())
    }

    /// Fails when `path` is taken or one of its ancestors is a file.
    pub fn check_creatable(&self, path: &str) -> Result<(), WorkspaceError> {
        if self.view.contains(path) {
            return Err(WorkspaceError::AlreadyExists(path.to_string()));
        }
        match paths::ancestors(path)
            .find(|ancestor| self.view.find(ancestor).is_some_and(|node| !node.is_directory()))
        {
            Some(blocker) => Err(WorkspaceError::NotADirectory(blocker.to_string())),
            None => Ok(()),
        }
    }

    /// Creates a file, or a directory realized as its marker file. Returns the file
    /// path that now carries the create.
    pub fn create(&mut self, path: &str, kind: EntryKind) -> Result<String, WorkspaceError> {
        self.check_creatable(path)?;

        let target = match kind {
            EntryKind::File => path.to_string(),
            EntryKind::Directory => paths::marker_for(path),
        };
        self.tracker.mark_created(&target);
        self.mirror.insert_created(&target, String::new());
        if kind == EntryKind::Directory {
            self.expanded.insert(path.to_string());
        }
        self.reconcile();
        Ok(target)
    }

    /// Optimistically removes `path` (recursively for directories) and returns the
    /// remote deletes still to issue.
    pub fn delete(&mut self, path: &str) -> Result<Vec<DeleteJob>, WorkspaceError> {
        if !self.view.contains(path) {
            return Err(WorkspaceError::NotFound(path.to_string()));
        }
        let files = self.view.files_under(path);

        let mut jobs = Vec::new();
        for file in files {
            let was_created = self.tracker.is_created(&file);
            let known_hash = self
                .snapshot
                .get(&file)
                .map(|entry| entry.hash.clone())
                .or_else(|| self.mirror.get(&file).and_then(|entry| entry.hash.clone()));
            let newly_pending = self.tracker.mark_pending_deletion(&file);
            self.mirror.remove(&file);
            if self.active.as_deref() == Some(file.as_str()) {
                self.active = None;
            }
            if newly_pending && !was_created {
                jobs.push(DeleteJob {
                    path: file,
                    hash: known_hash,
                });
            }
        }
        self.expanded.retain(|dir| dir != path && !paths::is_within(dir, path));
        self.reconcile();
        Ok(jobs)
    }

    /// Records a single successful push of `pushed`. The path counts as synced unless
    /// it was edited again meanwhile, in which case it is now a modified remote file.
    pub fn mark_pushed(&mut self, path: &str, pushed: String, hash: String) {
        self.tracker.clear_synced(path);
        let still_dirty = self
            .mirror
            .mark_pushed(path, pushed, hash.clone())
            .is_some_and(|entry| entry.is_dirty());
        if still_dirty {
            self.tracker.mark_modified(path);
        }
        if let Some(entry) = self.snapshot.get_mut(path) {
            entry.hash = hash;
        } else {
            self.snapshot
                .insert(path.to_string(), FileEntry::file(path, hash));
        }
        self.reconcile();
    }

    /// Records a file pushed around the mirror. A cached copy is stale now and dropped.
    pub fn record_upload(&mut self, path: &str, hash: String) {
        if self.mirror.remove(path).is_some() && self.active.as_deref() == Some(path) {
            self.active = None;
        }
        match self.snapshot.get_mut(path) {
            Some(entry) => entry.hash = hash,
            None => {
                self.snapshot
                    .insert(path.to_string(), FileEntry::file(path, hash));
            }
        }
        self.reconcile();
    }

    fn evict(&mut self) {
        let tracker = &self.tracker;
        let active = self.active.as_deref();
        let evicted = self.mirror.evict_over_capacity(|path| {
            tracker.is_created(path) || tracker.is_modified(path) || active == Some(path)
        });
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted clean mirror entries");
        }
    }

    /// Clean mirror entries whose remote hash moved are refetched on next open.
    fn drop_stale_clean_entries(&mut self) {
        let stale: Vec<String> = self
            .mirror
            .iter()
            .filter(|(path, entry)| {
                !entry.is_dirty()
                    && self.active.as_deref() != Some(path.as_str())
                    && entry.hash.as_ref().is_some_and(|hash| {
                        self.snapshot
                            .get(path.as_str())
                            .is_some_and(|remote| &remote.hash != hash)
                    })
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            self.mirror.remove(&path);
        }
    }
}
