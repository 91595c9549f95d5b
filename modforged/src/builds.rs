use std::sync::Arc;

use modforge_core::{
    Artifact, GithubClient, GithubError, Job, JobStep, RunConclusion, RunStatus, WorkflowRun,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_WORKFLOW_NAME: &str = "Build Mod";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    /// A push happened; the next run newer than `after_run_id` is ours.
    WaitingForBuild { after_run_id: Option<u64> },
    Tracking { run: WorkflowRun },
    /// Finished run kept on display until dismissed.
    Completed { run: WorkflowRun },
}

impl BuildState {
    pub fn run(&self) -> Option<&WorkflowRun> {
        match self {
            BuildState::Tracking { run } | BuildState::Completed { run } => Some(run),
            BuildState::Idle | BuildState::WaitingForBuild { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BuildState::Idle => "idle",
            BuildState::WaitingForBuild { .. } => "waiting for build",
            BuildState::Tracking { .. } => "processing",
            BuildState::Completed { run } => match run.conclusion {
                Some(RunConclusion::Success) => "build success",
                Some(RunConclusion::Failure) => "build failed",
                _ => "build finished",
            },
        }
    }
}

/// Detail fetches the watcher should issue for the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailRequest {
    pub jobs: Option<u64>,
    pub artifacts: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProgress {
    pub state: BuildState,
    pub steps: Vec<JobStep>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug)]
pub struct BuildTracker {
    workflow_name: String,
    state: BuildState,
    latest_seen: Option<u64>,
    dismissed_run_id: Option<u64>,
    steps: Vec<JobStep>,
    final_steps_fetched: bool,
    artifacts: Vec<Artifact>,
    artifacts_fetched: bool,
}

pub type BuildHandle = Arc<Mutex<BuildTracker>>;

pub fn shared_tracker(workflow_name: impl Into<String>) -> BuildHandle {
    Arc::new(Mutex::new(BuildTracker::new(workflow_name)))
}

impl BuildTracker {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            state: BuildState::Idle,
            latest_seen: None,
            dismissed_run_id: None,
            steps: Vec::new(),
            final_steps_fetched: false,
            artifacts: Vec::new(),
            artifacts_fetched: false,
        }
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    pub fn progress(&self) -> BuildProgress {
        BuildProgress {
            state: self.state.clone(),
            steps: self.steps.clone(),
            artifacts: self.artifacts.clone(),
        }
    }

    /// A push finished; start waiting for the run it triggers.
    pub fn sync_completed(&mut self) {
        self.state = BuildState::WaitingForBuild {
            after_run_id: self.latest_seen,
        };
        self.clear_details();
    }

    /// Returns to idle; the dismissed run is not adopted again.
    pub fn dismiss(&mut self) {
        if let Some(run) = self.state.run() {
            self.dismissed_run_id = Some(run.id);
        }
        self.state = BuildState::Idle;
        self.clear_details();
    }

    /// Feeds one CI listing into the state machine; true when the state changed.
    pub fn observe_runs(&mut self, runs: &[WorkflowRun]) -> bool {
        let Some(newest) = runs
            .iter()
            .filter(|run| run.name.as_deref() == Some(self.workflow_name.as_str()))
            .max_by_key(|run| run.id)
        else {
            return false;
        };
        let before = self.state.clone();

        let next = match &self.state {
            BuildState::Idle => {
                let active = matches!(newest.status, RunStatus::Queued | RunStatus::InProgress);
                if active && self.dismissed_run_id != Some(newest.id) {
                    Some(Self::track(newest.clone()))
                } else {
                    None
                }
            }
            BuildState::WaitingForBuild { after_run_id } => {
                let ours = match after_run_id {
                    Some(after) => newest.id > *after,
                    // Nothing was seen before the push, so a finished run may predate it.
                    None => matches!(newest.status, RunStatus::Queued | RunStatus::InProgress),
                };
                ours.then(|| Self::track(newest.clone()))
            }
            BuildState::Tracking { run } => runs
                .iter()
                .find(|candidate| candidate.id == run.id)
                .map(|updated| Self::track(updated.clone())),
            BuildState::Completed { .. } => None,
        };
        self.latest_seen = self.latest_seen.max(Some(newest.id));

        if let Some(next) = next {
            self.state = next;
        }
        self.state != before
    }

    pub fn detail_request(&self) -> DetailRequest {
        match &self.state {
            BuildState::Tracking { run } => DetailRequest {
                jobs: Some(run.id),
                artifacts: None,
            },
            BuildState::Completed { run } => DetailRequest {
                jobs: (!self.final_steps_fetched).then_some(run.id),
                artifacts: (!self.artifacts_fetched).then_some(run.id),
            },
            BuildState::Idle | BuildState::WaitingForBuild { .. } => DetailRequest::default(),
        }
    }

    /// Stores step statuses of the run's first job; results for other runs are dropped.
    pub fn record_jobs(&mut self, run_id: u64, jobs: Vec<Job>) {
        if !self.is_current(run_id) {
            return;
        }
        self.steps = jobs.into_iter().next().map(|job| job.steps).unwrap_or_default();
        if matches!(self.state, BuildState::Completed { .. }) {
            self.final_steps_fetched = true;
        }
    }

    pub fn record_artifacts(&mut self, run_id: u64, artifacts: Vec<Artifact>) {
        if !self.is_current(run_id) || !matches!(self.state, BuildState::Completed { .. }) {
            return;
        }
        self.artifacts = artifacts.into_iter().filter(|a| !a.expired).collect();
        self.artifacts_fetched = true;
    }

    fn track(run: WorkflowRun) -> BuildState {
        if run.status == RunStatus::Completed {
            BuildState::Completed { run }
        } else {
            BuildState::Tracking { run }
        }
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.state.run().is_some_and(|run| run.id == run_id)
    }

    fn clear_details(&mut self) {
        self.steps.clear();
        self.artifacts.clear();
        self.final_steps_fetched = false;
        self.artifacts_fetched = false;
    }
}

/// Polls the CI source and feeds the shared tracker.
#[derive(Clone)]
pub struct BuildWatcher {
    client: GithubClient,
    tracker: BuildHandle,
}

impl BuildWatcher {
    pub fn new(client: GithubClient, tracker: BuildHandle) -> Self {
        Self { client, tracker }
    }

    pub fn tracker(&self) -> &BuildHandle {
        &self.tracker
    }

    /// One polling cycle. Detail fetch failures only skip that detail this cycle.
    pub async fn poll_once(&self) -> Result<bool, GithubError> {
        let runs = self.client.list_workflow_runs().await?;
        let (changed, request) = {
            let mut tracker = self.tracker.lock().await;
            let changed = tracker.observe_runs(&runs);
            if changed {
                info!(state = tracker.state().label(), "build state changed");
            }
            (changed, tracker.detail_request())
        };

        if let Some(run_id) = request.jobs {
            match self.client.list_run_jobs(run_id).await {
                Ok(jobs) => self.tracker.lock().await.record_jobs(run_id, jobs),
                Err(err) => debug!(run_id, error = %err, "job listing failed"),
            }
        }
        if let Some(run_id) = request.artifacts {
            match self.client.list_run_artifacts(run_id).await {
                Ok(artifacts) => self.tracker.lock().await.record_artifacts(run_id, artifacts),
                Err(err) => debug!(run_id, error = %err, "artifact listing failed"),
            }
        }
        Ok(changed)
    }
}
