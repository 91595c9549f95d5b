use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use modforge_core::{Artifact, GeminiClient, GithubClient, Repository};
use tracing::{debug, info, warn};

use crate::assistant::Assistant;
use crate::builds::{
    BuildHandle, BuildProgress, BuildState, BuildWatcher, DEFAULT_WORKFLOW_NAME, shared_tracker,
};
use crate::workspace::{SyncOutcome, SyncReport, Workspace};

const DEFAULT_TREE_POLL_SECS: u64 = 5;
const DEFAULT_BUILD_POLL_SECS: u64 = 2;
const DEFAULT_BUILD_WAIT_SECS: u64 = 600;

#[derive(Clone)]
pub struct SessionConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    /// `None` lists `main` and falls back to `master`.
    pub branch: Option<String>,
    pub api_base_url: Option<String>,
    pub tree_poll_interval: Duration,
    pub build_poll_interval: Duration,
    /// How long a one-shot command follows the build its push started; zero skips it.
    pub build_wait: Duration,
    /// Where artifacts of a followed build are written.
    pub artifact_dir: Option<PathBuf>,
    pub workflow_name: String,
    pub mirror_capacity: Option<usize>,
    pub log_tree_changes: bool,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
}

impl SessionConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = non_empty(&lookup, "GITHUB_TOKEN").context("GITHUB_TOKEN is not set")?;
        let slug = non_empty(&lookup, "MODFORGE_REPO").context("MODFORGE_REPO is not set")?;
        let (owner, repo) = parse_repo_slug(&slug)?;
        let tree_poll_interval = Duration::from_secs(read_u64_var(
            &lookup,
            "MODFORGE_TREE_POLL_SECS",
            DEFAULT_TREE_POLL_SECS,
        ));
        let build_poll_interval = Duration::from_secs(read_u64_var(
            &lookup,
            "MODFORGE_BUILD_POLL_SECS",
            DEFAULT_BUILD_POLL_SECS,
        ));
        let mirror_capacity = match read_u64_var(&lookup, "MODFORGE_MIRROR_CAPACITY", 0) {
            0 => None,
            capacity => Some(usize::try_from(capacity).unwrap_or(usize::MAX)),
        };

        Ok(Self {
            token,
            owner,
            repo,
            branch: non_empty(&lookup, "MODFORGE_BRANCH"),
            api_base_url: non_empty(&lookup, "MODFORGE_API_URL"),
            tree_poll_interval,
            build_poll_interval,
            build_wait: Duration::from_secs(read_u64_var(
                &lookup,
                "MODFORGE_BUILD_WAIT_SECS",
                DEFAULT_BUILD_WAIT_SECS,
            )),
            artifact_dir: non_empty(&lookup, "MODFORGE_ARTIFACT_DIR").map(PathBuf::from),
            workflow_name: non_empty(&lookup, "MODFORGE_WORKFLOW_NAME")
                .unwrap_or_else(|| DEFAULT_WORKFLOW_NAME.to_string()),
            mirror_capacity,
            log_tree_changes: read_bool_var(&lookup, "MODFORGE_LOG_TREE", true),
            gemini_api_key: non_empty(&lookup, "GEMINI_API_KEY"),
            gemini_model: non_empty(&lookup, "GEMINI_MODEL"),
        })
    }
}

/// One open project: the workspace, its build watcher and the optional assistant.
pub struct SessionRuntime {
    config: SessionConfig,
    workspace: Arc<Workspace>,
    builds: BuildHandle,
    watcher: BuildWatcher,
    assistant: Option<Assistant>,
}

impl SessionRuntime {
    pub async fn bootstrap(config: SessionConfig) -> anyhow::Result<Self> {
        let client = build_client(&config)?;
        let user = client
            .get_user()
            .await
            .context("failed to validate GitHub token")?;
        info!(
            login = %user.login,
            repo = %format!("{}/{}", config.owner, config.repo),
            "authenticated"
        );

        let builds = shared_tracker(config.workflow_name.clone());
        let workspace = Workspace::new(client.clone(), Arc::clone(&builds))
            .with_mirror_capacity(config.mirror_capacity);
        workspace
            .load()
            .await
            .context("failed to list repository tree")?;
        let watcher = BuildWatcher::new(client, Arc::clone(&builds));
        // Runs listed now predate any push of this session.
        if let Err(err) = watcher.poll_once().await {
            debug!(error = %err, "initial build poll failed");
        }
        let assistant = build_assistant(&config)?;

        Ok(Self {
            config,
            workspace: Arc::new(workspace),
            builds,
            watcher,
            assistant,
        })
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub async fn render_tree(&self) -> String {
        self.workspace.tree().await.render()
    }

    pub async fn repositories(&self) -> anyhow::Result<Vec<Repository>> {
        self.workspace
            .client()
            .list_repositories()
            .await
            .context("failed to list repositories")
    }

    /// One assistant turn; resulting changes are synced right away and the build they
    /// start is followed.
    pub async fn ask(&mut self, message: &str) -> anyhow::Result<String> {
        let assistant = self
            .assistant
            .as_mut()
            .context("GEMINI_API_KEY is not set")?;
        let turn = assistant.ask(&self.workspace, message).await;
        let mut display = turn.display;

        if self.workspace.has_unsynced_changes().await {
            self.poll_builds().await;
            let outcome = self.workspace.sync_all().await;
            display.push_str("\n\n");
            display.push_str(&describe_sync(&outcome));
            if let Some(report) = self.follow_build().await? {
                display.push('\n');
                display.push_str(&report);
            }
        }
        self.workspace.wait_for_background_deletes().await;
        Ok(display)
    }

    /// Uploads a local file into `dest_dir` and follows the build it starts.
    pub async fn import(&self, local: &Path, dest_dir: &str) -> anyhow::Result<String> {
        self.poll_builds().await;
        let target = self
            .workspace
            .import_file(local, dest_dir)
            .await
            .with_context(|| format!("failed to import {}", local.display()))?;
        let mut display = format!("Imported {target}.");
        if let Some(report) = self.follow_build().await? {
            display.push('\n');
            display.push_str(&report);
        }
        Ok(display)
    }

    async fn poll_builds(&self) {
        if let Err(err) = self.watcher.poll_once().await {
            debug!(error = %err, "build poll failed");
        }
    }

    /// Polls until the build started by the last push completes, the wait runs out or
    /// Ctrl-C arrives. Artifacts are saved when an artifact directory is configured.
    async fn follow_build(&self) -> anyhow::Result<Option<String>> {
        if self.config.build_wait.is_zero() {
            return Ok(None);
        }
        let finished = tokio::select! {
            finished = tokio::time::timeout(self.config.build_wait, self.completed_build()) => finished.ok(),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(progress) = finished else {
            let progress = self.builds.lock().await.progress();
            return Ok(Some(format!(
                "Stopped following the build: {}",
                describe_build(&progress)
            )));
        };

        let mut lines = vec![describe_build(&progress)];
        if let Some(dir) = &self.config.artifact_dir {
            let saved = save_artifacts(self.workspace.client(), &progress.artifacts, dir).await?;
            lines.extend(saved.iter().map(|path| format!("Saved {}", path.display())));
        }
        Ok(Some(lines.join("\n")))
    }

    async fn completed_build(&self) -> BuildProgress {
        loop {
            self.poll_builds().await;
            let progress = self.builds.lock().await.progress();
            if matches!(progress.state, BuildState::Completed { .. }) {
                return progress;
            }
            tokio::time::sleep(self.config.build_poll_interval).await;
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            repo = %format!("{}/{}", self.config.owner, self.config.repo),
            tree_poll_secs = self.config.tree_poll_interval.as_secs(),
            build_poll_secs = self.config.build_poll_interval.as_secs(),
            "session started"
        );

        let workspace_for_tree = Arc::clone(&self.workspace);
        let tree_poll_interval = self.config.tree_poll_interval;
        let log_tree_changes = self.config.log_tree_changes;
        let tree_handle = tokio::spawn(async move {
            let mut last_rendered = workspace_for_tree.tree().await.render();
            loop {
                tokio::time::sleep(tree_poll_interval).await;
                if !workspace_for_tree.refresh().await {
                    continue;
                }
                let rendered = workspace_for_tree.tree().await.render();
                if rendered != last_rendered {
                    if log_tree_changes {
                        info!("tree changed:\n{rendered}");
                    } else {
                        debug!("tree changed");
                    }
                    last_rendered = rendered;
                }
            }
        });

        let watcher = self.watcher.clone();
        let builds = Arc::clone(&self.builds);
        let build_poll_interval = self.config.build_poll_interval;
        let build_handle = tokio::spawn(async move {
            loop {
                match watcher.poll_once().await {
                    Ok(true) => {
                        let progress = builds.lock().await.progress();
                        info!("{}", describe_build(&progress));
                    }
                    Ok(false) => {}
                    Err(err) => debug!(error = %err, "build poll failed"),
                }
                tokio::time::sleep(build_poll_interval).await;
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;

        tree_handle.abort();
        build_handle.abort();
        if self.workspace.has_unsynced_changes().await {
            warn!("exiting with unsynced changes");
        }
        self.workspace.wait_for_background_deletes().await;
        info!("session closed");
        Ok(())
    }
}

include!("session_helpers.rs");

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
