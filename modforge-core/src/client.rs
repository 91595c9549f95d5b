use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const DEFAULT_BRANCH: &str = "main";
const LEGACY_BRANCH: &str = "master";
const ACCEPT_V3: &str = "application/vnd.github.v3+json";
const CLIENT_AGENT: &str = concat!("modforge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid base64 content: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("unsupported content encoding: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    NotFound,
    Conflict,
    Transient,
    Permanent,
}

/// Client for one repository's contents, trees and actions.
#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    base_url: Url,
    token: String,
    owner: String,
    repo: String,
    branch: Option<String>,
}

impl GithubClient {
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self, GithubError> {
        Self::with_base_url(DEFAULT_BASE_URL, token, owner, repo)
    }

    pub fn with_base_url(
        base_url: &str,
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self, GithubError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(GithubError::Url(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
            branch: None,
        })
    }

    /// Pins trees, writes and deletes to `branch` instead of the repository default.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub async fn get_user(&self) -> Result<User, GithubError> {
        let url = self.base_url.join("/user")?;
        let response = self.request(Method::GET, url).send().await?;
        Self::handle_response(response).await
    }

    /// Recursive listing of the pinned branch, or of `main` with a `master` fallback.
    pub async fn list_tree(&self) -> Result<Vec<FileEntry>, GithubError> {
        match &self.branch {
            Some(branch) => self.list_tree_at(branch).await,
            None => match self.list_tree_at(DEFAULT_BRANCH).await {
                Err(err) if err.is_not_found() => self.list_tree_at(LEGACY_BRANCH).await,
                other => other,
            },
        }
    }

    pub async fn list_tree_at(&self, branch: &str) -> Result<Vec<FileEntry>, GithubError> {
        let mut url = self.repo_endpoint(&["git", "trees"], Some(branch))?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let response = self.request(Method::GET, url).send().await?;
        let payload: TreeResponse = Self::handle_response(response).await?;
        Ok(payload
            .tree
            .into_iter()
            .filter_map(FileEntry::from_wire)
            .collect())
    }

    pub async fn read_blob(&self, path: &str) -> Result<String, GithubError> {
        Ok(self.read_blob_versioned(path).await?.content)
    }

    /// Decoded content of `path` together with the hash it was read at.
    pub async fn read_blob_versioned(&self, path: &str) -> Result<Blob, GithubError> {
        let contents = self.get_contents(path).await?;
        // Files above the contents API size limit come back as encoding "none".
        let content = match (contents.encoding.as_deref(), contents.content) {
            (Some("base64"), Some(content)) => decode_content(&content)?,
            (_, None) => String::new(),
            (None, Some(content)) => content,
            (Some(other), Some(_)) => return Err(GithubError::Encoding(other.to_string())),
        };
        Ok(Blob {
            content,
            hash: contents.sha,
        })
    }

    /// Current content hash of `path`, `None` when the file does not exist.
    pub async fn get_blob_hash(&self, path: &str) -> Result<Option<String>, GithubError> {
        match self.get_contents(path).await {
            Ok(contents) => Ok(Some(contents.sha)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Creates or updates `path`. Without `known_hash` the current hash is looked up
    /// first, which turns the write into create-or-replace. Returns the new hash.
    pub async fn write_blob(
        &self,
        path: &str,
        content: &str,
        message: &str,
        known_hash: Option<&str>,
    ) -> Result<String, GithubError> {
        self.put_contents(path, STANDARD.encode(content.as_bytes()), message, known_hash)
            .await
    }

    /// Create-or-replace of `path` with content that is already base64 encoded, for
    /// binary files that never pass through the text mirror.
    pub async fn upload_blob(
        &self,
        path: &str,
        content_base64: &str,
        message: &str,
    ) -> Result<String, GithubError> {
        self.put_contents(path, content_base64.to_string(), message, None)
            .await
    }

    async fn put_contents(
        &self,
        path: &str,
        content: String,
        message: &str,
        known_hash: Option<&str>,
    ) -> Result<String, GithubError> {
        let sha = match known_hash {
            Some(hash) => Some(hash.to_string()),
            None => self.get_blob_hash(path).await?,
        };
        let body = WriteRequest {
            message,
            content,
            sha: sha.as_deref(),
            branch: self.branch.as_deref(),
        };
        let url = self.contents_endpoint(path)?;
        let response = self.request(Method::PUT, url).json(&body).send().await?;
        let payload: WriteResponse = Self::handle_response(response).await?;
        Ok(payload.content.sha)
    }

    pub async fn delete_blob(
        &self,
        path: &str,
        message: &str,
        hash: &str,
    ) -> Result<(), GithubError> {
        let body = DeleteRequest {
            message,
            sha: hash,
            branch: self.branch.as_deref(),
        };
        let url = self.contents_endpoint(path)?;
        let response = self
            .request(Method::DELETE, url)
            .json(&body)
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    pub async fn list_workflow_runs(&self) -> Result<Vec<WorkflowRun>, GithubError> {
        let mut url = self.repo_endpoint(&["actions", "runs"], None)?;
        url.query_pairs_mut().append_pair("per_page", "10");
        let response = self.request(Method::GET, url).send().await?;
        let payload: RunsResponse = Self::handle_response(response).await?;
        Ok(payload.workflow_runs)
    }

    pub async fn list_run_jobs(&self, run_id: u64) -> Result<Vec<Job>, GithubError> {
        let run = run_id.to_string();
        let url = self.repo_endpoint(&["actions", "runs", &run, "jobs"], None)?;
        let response = self.request(Method::GET, url).send().await?;
        let payload: JobsResponse = Self::handle_response(response).await?;
        Ok(payload.jobs)
    }

    pub async fn list_run_artifacts(&self, run_id: u64) -> Result<Vec<Artifact>, GithubError> {
        let run = run_id.to_string();
        let url = self.repo_endpoint(&["actions", "runs", &run, "artifacts"], None)?;
        let response = self.request(Method::GET, url).send().await?;
        let payload: ArtifactsResponse = Self::handle_response(response).await?;
        Ok(payload.artifacts)
    }

    /// Zip archive behind `archive_download_url`. The API answers with a redirect to
    /// short-lived storage, which reqwest follows.
    pub async fn download_artifact(&self, artifact: &Artifact) -> Result<Vec<u8>, GithubError> {
        let response = self
            .request(Method::GET, artifact.archive_download_url.clone())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.bytes().await?.to_vec())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GithubError::Api { status, body })
        }
    }

    /// Repositories of the authenticated user, most recently updated first.
    pub async fn list_repositories(&self) -> Result<Vec<Repository>, GithubError> {
        let mut url = self.base_url.join("/user/repos")?;
        url.query_pairs_mut()
            .append_pair("sort", "updated")
            .append_pair("per_page", "100");
        let response = self.request(Method::GET, url).send().await?;
        Self::handle_response(response).await
    }

    pub async fn dispatch_workflow(
        &self,
        workflow_id: &str,
        git_ref: &str,
    ) -> Result<(), GithubError> {
        let url = self.repo_endpoint(&["actions", "workflows", workflow_id, "dispatches"], None)?;
        let body = DispatchRequest { git_ref };
        let response = self.request(Method::POST, url).json(&body).send().await?;
        Self::handle_empty(response).await
    }

    async fn get_contents(&self, path: &str) -> Result<ContentsResponse, GithubError> {
        let mut url = self.contents_endpoint(path)?;
        if let Some(branch) = &self.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        let response = self.request(Method::GET, url).send().await?;
        Self::handle_response(response).await
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, ACCEPT_V3)
            .header(USER_AGENT, CLIENT_AGENT)
    }

    fn contents_endpoint(&self, path: &str) -> Result<Url, GithubError> {
        self.repo_endpoint(&["contents"], Some(path))
    }

    /// `/repos/{owner}/{repo}/{segments..}/{tail}`; `tail` keeps its `/` separators while
    /// every piece is percent-encoded on its own.
    fn repo_endpoint(&self, segments: &[&str], tail: Option<&str>) -> Result<Url, GithubError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GithubError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty()
                .push("repos")
                .push(&self.owner)
                .push(&self.repo)
                .extend(segments);
            if let Some(tail) = tail {
                path.extend(tail.split('/').filter(|part| !part.is_empty()));
            }
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GithubError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GithubError::Api { status, body })
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), GithubError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GithubError::Api { status, body })
        }
    }
}

impl GithubError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            GithubError::Api { status, body } => Some(classify_api_status(*status, body)),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.classification() == Some(ApiErrorClass::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        self.classification() == Some(ApiErrorClass::Conflict)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GithubError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode, body: &str) -> ApiErrorClass {
    let lowered = body.to_ascii_lowercase();
    if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status == StatusCode::CONFLICT
        || (status == StatusCode::UNPROCESSABLE_ENTITY && lowered.contains("sha"))
    {
        // Stale or missing content hash on a conditional write/delete.
        ApiErrorClass::Conflict
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && lowered.contains("rate limit"))
    {
        ApiErrorClass::RateLimit
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn decode_content(encoded: &str) -> Result<String, GithubError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact)?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    Directory,
    File,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub kind: EntryKind,
    pub hash: String,
    pub size: Option<u64>,
}

impl FileEntry {
    pub fn file(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            hash: hash.into(),
            size: None,
        }
    }

    pub fn directory(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            hash: hash.into(),
            size: None,
        }
    }

    fn from_wire(item: TreeItem) -> Option<Self> {
        // Submodules ("commit") and anything else unknown are not editable paths.
        let kind = match item.item_type.as_str() {
            "blob" => EntryKind::File,
            "tree" => EntryKind::Directory,
            _ => return None,
        };
        Some(Self {
            path: item.path,
            kind,
            hash: item.sha,
            size: item.size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content: String,
    pub hash: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct User {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RepositoryOwner {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: RepositoryOwner,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JobStep {
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size_in_bytes: u64,
    pub archive_download_url: Url,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    item_type: String,
    sha: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Debug, Deserialize)]
struct WrittenContent {
    sha: String,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    message: &'a str,
    sha: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DispatchRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct RunsResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct ArtifactsResponse {
    artifacts: Vec<Artifact>,
}
