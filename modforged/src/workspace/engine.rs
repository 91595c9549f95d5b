use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::join_all;
use modforge_core::{EntryKind, GithubClient};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::backoff::RetryPolicy;
use super::paths;
use super::reconcile::TreeView;
use super::state::{DeleteJob, WorkspaceState};
use super::WorkspaceError;
use crate::builds::BuildHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: Vec<String>,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NothingToSync,
    Completed(SyncReport),
}

/// One project session: remote client, local state and the background deletes it
/// started. Operations take the state lock only between awaits.
pub struct Workspace {
    client: GithubClient,
    state: Mutex<WorkspaceState>,
    builds: BuildHandle,
    deletes: TaskTracker,
    delete_policy: RetryPolicy,
}

impl Workspace {
    pub fn new(client: GithubClient, builds: BuildHandle) -> Self {
        Self {
            client,
            state: Mutex::new(WorkspaceState::new(None)),
            builds,
            deletes: TaskTracker::new(),
            delete_policy: RetryPolicy::default(),
        }
    }

    pub fn with_mirror_capacity(mut self, capacity: Option<usize>) -> Self {
        self.state = Mutex::new(WorkspaceState::new(capacity));
        self
    }

    pub fn with_delete_policy(mut self, policy: RetryPolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn client(&self) -> &GithubClient {
        &self.client
    }

    /// Initial listing; unlike [`Workspace::refresh`] a failure is reported.
    pub async fn load(&self) -> Result<(), WorkspaceError> {
        let entries = self.client.list_tree().await?;
        self.state.lock().await.apply_snapshot(entries);
        Ok(())
    }

    /// Periodic re-listing. A failed fetch means no update this cycle.
    pub async fn refresh(&self) -> bool {
        match self.client.list_tree().await {
            Ok(entries) => {
                self.state.lock().await.apply_snapshot(entries);
                true
            }
            Err(err) => {
                debug!(error = %err, "tree refresh failed");
                false
            }
        }
    }

    pub async fn tree(&self) -> TreeView {
        self.state.lock().await.view().clone()
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.state.lock().await.view().contains(path)
    }

    pub async fn has_unsynced_changes(&self) -> bool {
        self.state.lock().await.tracker().has_unsynced()
    }

    pub async fn toggle_expanded(&self, path: &str) -> Result<bool, WorkspaceError> {
        let path = paths::normalize(path)?;
        let mut state = self.state.lock().await;
        if !state.is_directory(&path) {
            return Err(WorkspaceError::NotADirectory(path));
        }
        Ok(state.toggle_expanded(&path))
    }

    pub async fn content_of(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .mirror()
            .content(path)
            .map(str::to_string)
    }

    /// Path and content of the file last opened.
    pub async fn active_file(&self) -> Option<(String, String)> {
        let state = self.state.lock().await;
        let path = state.active()?;
        let content = state.mirror().content(path)?;
        Some((path.to_string(), content.to_string()))
    }

    /// Prompt context for the assistant: active file and every visible file path.
    pub async fn context_summary(&self) -> String {
        let state = self.state.lock().await;
        format!(
            "Current File: {}\nFile Tree: {}",
            state.active().unwrap_or("None"),
            state.view().file_paths().join(", ")
        )
    }

    pub async fn open_file(&self, path: &str) -> Result<String, WorkspaceError> {
        let path = paths::normalize(path)?;
        {
            let mut state = self.state.lock().await;
            if state.is_directory(&path) {
                return Err(WorkspaceError::IsDirectory(path));
            }
            if let Some(content) = state.open_cached(&path) {
                return Ok(content);
            }
        }

        let blob = self
            .client
            .read_blob_versioned(&path)
            .await
            .map_err(|source| WorkspaceError::Load {
                path: path.clone(),
                source,
            })?;
        self.state
            .lock()
            .await
            .finish_open(&path, blob.content, Some(blob.hash))
    }

    pub async fn edit_file(&self, path: &str, content: impl Into<String>) -> Result<(), WorkspaceError> {
        let path = paths::normalize(path)?;
        self.state.lock().await.edit(&path, content.into())
    }

    pub async fn create_file(&self, path: &str) -> Result<(), WorkspaceError> {
        let path = paths::normalize(path)?;
        self.state.lock().await.create(&path, EntryKind::File)?;
        Ok(())
    }

    /// Creates a file and fills it in one step.
    pub async fn create_file_with_content(
        &self,
        path: &str,
        content: impl Into<String>,
    ) -> Result<(), WorkspaceError> {
        let path = paths::normalize(path)?;
        let mut state = self.state.lock().await;
        let target = state.create(&path, EntryKind::File)?;
        state.edit(&target, content.into())
    }

    pub async fn create_directory(&self, path: &str) -> Result<(), WorkspaceError> {
        let path = paths::normalize(path)?;
        self.state.lock().await.create(&path, EntryKind::Directory)?;
        Ok(())
    }

    /// Removes `path` from the tree immediately. Remote deletes run in the
    /// background; returns how many were started.
    pub async fn delete_entry(&self, path: &str) -> Result<usize, WorkspaceError> {
        let path = paths::normalize(path)?;
        let jobs = self.state.lock().await.delete(&path)?;
        let started = jobs.len();
        for job in jobs {
            self.spawn_delete(job);
        }
        Ok(started)
    }

    /// Moves a file or directory. Moved files are pushed right away; the old paths
    /// go through the regular delete flow.
    pub async fn rename_entry(&self, from: &str, to: &str) -> Result<(), WorkspaceError> {
        let from = paths::normalize(from)?;
        let to = paths::normalize(to)?;
        if to == from || paths::is_within(&to, &from) {
            return Err(WorkspaceError::InvalidTarget(to));
        }

        let (files, mut contents) = {
            let state = self.state.lock().await;
            if !state.view().contains(&from) {
                return Err(WorkspaceError::NotFound(from));
            }
            if state.view().contains(&to) {
                return Err(WorkspaceError::AlreadyExists(to));
            }
            let unrelated = state
                .tracker()
                .unsynced()
                .into_iter()
                .any(|path| path != from && !paths::is_within(&path, &from));
            if unrelated {
                return Err(WorkspaceError::UnsyncedChanges);
            }
            let files = state.view().files_under(&from);
            let contents: Vec<Option<String>> = files
                .iter()
                .map(|file| state.mirror().content(file).map(str::to_string))
                .collect();
            (files, contents)
        };

        for (file, content) in files.iter().zip(contents.iter_mut()) {
            if content.is_none() {
                let text = self
                    .client
                    .read_blob(file)
                    .await
                    .map_err(|source| WorkspaceError::Load {
                        path: file.clone(),
                        source,
                    })?;
                *content = Some(text);
            }
        }

        let moved: Vec<(String, String)> = files
            .iter()
            .zip(contents)
            .map(|(file, content)| {
                let suffix = &file[from.len()..];
                (format!("{to}{suffix}"), content.unwrap_or_default())
            })
            .collect();

        let jobs = {
            let mut state = self.state.lock().await;
            if !state.view().contains(&from) {
                return Err(WorkspaceError::NotFound(from));
            }
            // The tree may have been refreshed while contents were fetched.
            for (target, _) in &moved {
                state.check_creatable(target)?;
            }
            for (target, content) in &moved {
                state.create(target, EntryKind::File)?;
                state.edit(target, content.clone())?;
            }
            state.delete(&from)?
        };
        for job in jobs {
            self.spawn_delete(job);
        }

        let message = format!("Rename {from} to {to}");
        let results = join_all(
            moved
                .iter()
                .map(|(target, content)| self.client.write_blob(target, content, &message, None)),
        )
        .await;
        let mut state = self.state.lock().await;
        for ((target, content), result) in moved.into_iter().zip(results) {
            match result {
                Ok(hash) => state.mark_pushed(&target, content, hash),
                Err(err) => warn!(path = %target, error = %err, "renamed file left unsynced"),
            }
        }
        info!(from = %from, to = %to, "renamed");
        Ok(())
    }

    /// Copies a file into `dest_dir` (empty for the root) as a new local file.
    pub async fn copy_entry(&self, source: &str, dest_dir: &str) -> Result<String, WorkspaceError> {
        let source = paths::normalize(source)?;
        let dest_dir = match dest_dir.trim_matches('/') {
            "" => String::new(),
            dir => paths::normalize(dir)?,
        };

        let cached = {
            let state = self.state.lock().await;
            if !state.view().contains(&source) {
                return Err(WorkspaceError::NotFound(source));
            }
            if state.is_directory(&source) {
                return Err(WorkspaceError::IsDirectory(source));
            }
            if !dest_dir.is_empty() && !state.is_directory(&dest_dir) {
                return Err(WorkspaceError::NotADirectory(dest_dir));
            }
            state.mirror().content(&source).map(str::to_string)
        };
        let content = match cached {
            Some(content) => content,
            None => self
                .client
                .read_blob(&source)
                .await
                .map_err(|source_err| WorkspaceError::Load {
                    path: source.clone(),
                    source: source_err,
                })?,
        };

        let target = paths::join(&dest_dir, paths::file_name(&source));
        let mut state = self.state.lock().await;
        state.create(&target, EntryKind::File)?;
        state.edit(&target, content)?;
        Ok(target)
    }

    /// Uploads a local file into `dest_dir` (empty for the root) right away, binary
    /// content included. The target must not carry unsynced local changes.
    pub async fn import_file(&self, local: &Path, dest_dir: &str) -> Result<String, WorkspaceError> {
        let dest_dir = match dest_dir.trim_matches('/') {
            "" => String::new(),
            dir => paths::normalize(dir)?,
        };
        let name = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| WorkspaceError::InvalidTarget(local.display().to_string()))?;
        let target = paths::normalize(&paths::join(&dest_dir, name))?;

        {
            let state = self.state.lock().await;
            if !dest_dir.is_empty() && !state.is_directory(&dest_dir) {
                return Err(WorkspaceError::NotADirectory(dest_dir));
            }
            if state.is_directory(&target) {
                return Err(WorkspaceError::IsDirectory(target));
            }
            let tracker = state.tracker();
            if tracker.is_created(&target)
                || tracker.is_modified(&target)
                || tracker.is_pending_deletion(&target)
            {
                return Err(WorkspaceError::UnsyncedChanges);
            }
        }

        let bytes = tokio::fs::read(local)
            .await
            .map_err(|source| WorkspaceError::Import {
                path: local.to_path_buf(),
                source,
            })?;
        let message = format!("Import {name}");
        let hash = self
            .client
            .upload_blob(&target, &STANDARD.encode(&bytes), &message)
            .await
            .map_err(|err| WorkspaceError::from_remote(&target, err))?;
        self.state.lock().await.record_upload(&target, hash);
        info!(path = %target, bytes = bytes.len(), "imported");
        self.refresh().await;
        self.builds.lock().await.sync_completed();
        Ok(target)
    }

    /// Pushes one open file. A remote-backed file is written against the hash it was
    /// loaded at, so a concurrent remote change surfaces as a conflict.
    pub async fn save_file(&self, path: &str) -> Result<bool, WorkspaceError> {
        let path = paths::normalize(path)?;
        let (content, known_hash, created) = {
            let state = self.state.lock().await;
            let entry = state
                .mirror()
                .get(&path)
                .ok_or_else(|| WorkspaceError::NotOpen(path.clone()))?;
            let created = state.tracker().is_created(&path);
            if !created && !state.tracker().is_modified(&path) {
                return Ok(false);
            }
            (entry.content.clone(), entry.hash.clone(), created)
        };

        let message = commit_message(&path, created);
        let hash = self
            .client
            .write_blob(&path, &content, &message, known_hash.as_deref())
            .await
            .map_err(|err| WorkspaceError::from_remote(&path, err))?;
        self.state.lock().await.mark_pushed(&path, content, hash);
        info!(path = %path, "saved");
        self.refresh().await;
        self.builds.lock().await.sync_completed();
        Ok(true)
    }

    /// Pushes every created or modified file, then drops all local tracking in
    /// favor of a fresh listing.
    pub async fn sync_all(&self) -> SyncOutcome {
        let (writes, mut report) = {
            let state = self.state.lock().await;
            let unsynced = state.tracker().unsynced();
            if unsynced.is_empty() {
                return SyncOutcome::NothingToSync;
            }
            let mut writes = Vec::new();
            let mut report = SyncReport::default();
            for path in unsynced {
                match state.mirror().content(&path) {
                    Some(content) => {
                        let message = commit_message(&path, state.tracker().is_created(&path));
                        writes.push((path, content.to_string(), message));
                    }
                    None => report.failed.push(SyncFailure {
                        message: "no local content".to_string(),
                        path,
                    }),
                }
            }
            (writes, report)
        };

        let results = join_all(writes.iter().map(|(path, content, message)| {
            self.client.write_blob(path, content, message, None)
        }))
        .await;
        for ((path, _, _), result) in writes.into_iter().zip(results) {
            match result {
                Ok(_) => report.pushed.push(path),
                Err(err) => {
                    warn!(path = %path, error = %err, "push failed");
                    report.failed.push(SyncFailure {
                        path,
                        message: err.to_string(),
                    });
                }
            }
        }

        let relisted = match self.client.list_tree().await {
            Ok(entries) => Some(entries),
            Err(err) => {
                warn!(error = %err, "re-listing after sync failed, keeping previous snapshot");
                None
            }
        };
        self.state.lock().await.hard_reset(relisted);
        self.builds.lock().await.sync_completed();

        info!(
            pushed = report.pushed.len(),
            failed = report.failed.len(),
            "sync finished"
        );
        SyncOutcome::Completed(report)
    }

    /// Blocks until every background delete started so far has finished.
    pub async fn wait_for_background_deletes(&self) {
        self.deletes.close();
        self.deletes.wait().await;
        self.deletes.reopen();
    }

    fn spawn_delete(&self, job: DeleteJob) {
        let client = self.client.clone();
        let policy = self.delete_policy;
        self.deletes.spawn(delete_remote(client, job, policy));
    }
}

fn commit_message(path: &str, created: bool) -> String {
    if created {
        format!("Create {path}")
    } else {
        format!("Update {path}")
    }
}

/// Issues one remote delete. A path that stays behind remains suppressed until the
/// next full reset.
async fn delete_remote(client: GithubClient, job: DeleteJob, policy: RetryPolicy) {
    let DeleteJob { path, mut hash } = job;
    let message = format!("Delete {path}");
    let mut attempt = 0;
    loop {
        let result = if let Some(known) = hash.clone() {
            client.delete_blob(&path, &message, &known).await
        } else {
            match client.get_blob_hash(&path).await {
                Ok(Some(current)) => {
                    hash = Some(current);
                    continue;
                }
                Ok(None) => {
                    debug!(path = %path, "already absent remotely");
                    return;
                }
                Err(err) => Err(err),
            }
        };

        match result {
            Ok(()) => {
                debug!(path = %path, "remote delete finished");
                return;
            }
            Err(err) if err.is_not_found() => {
                debug!(path = %path, "already absent remotely");
                return;
            }
            Err(err) if err.is_retryable() && policy.allows_retry_after(attempt) => {
                let delay = policy.delay(attempt);
                debug!(path = %path, attempt, ?delay, error = %err, "retrying remote delete");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(path = %path, error = %err, "remote delete failed");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
