use super::*;
use crate::builds::{BuildState, DEFAULT_WORKFLOW_NAME, shared_tracker};
use crate::workspace::reconcile::FileStatus;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn workspace(server: &MockServer) -> Workspace {
    let client = GithubClient::with_base_url(&server.uri(), "test-token", "octo", "mod").unwrap();
    Workspace::new(client, shared_tracker(DEFAULT_WORKFLOW_NAME))
        .with_delete_policy(RetryPolicy::immediate(3))
}

fn blob(path: &str, sha: &str) -> Value {
    json!({ "path": path, "type": "blob", "sha": sha, "size": 1 })
}

fn tree_dir(path: &str) -> Value {
    json!({ "path": path, "type": "tree", "sha": format!("t-{path}") })
}

fn listing(entries: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "sha": "root", "tree": entries }))
}

async fn mount_listing(server: &MockServer, entries: Vec<Value>, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/repos/octo/mod/git/trees/main"))
        .respond_with(listing(entries));
    match times {
        Some(times) => mock.up_to_n_times(times).mount(server).await,
        None => mock.mount(server).await,
    }
}

async fn mount_contents(server: &MockServer, file: &str, sha: &str, base64: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/octo/mod/contents/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": file,
            "sha": sha,
            "type": "file",
            "encoding": "base64",
            "content": base64
        })))
        .mount(server)
        .await;
}

async fn mount_absent(server: &MockServer, file: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/octo/mod/contents/{file}")))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(server)
        .await;
}

async fn mount_write(server: &MockServer, file: &str, status: u16, new_sha: &str) {
    Mock::given(method("PUT"))
        .and(path(format!("/repos/octo/mod/contents/{file}")))
        .respond_with(
            ResponseTemplate::new(status).set_body_json(json!({ "content": { "sha": new_sha } })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn created_file_is_synced_and_signals_build() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h-readme")], Some(1)).await;
    mount_listing(
        &server,
        vec![
            blob("README.md", "h-readme"),
            tree_dir("a"),
            blob("a/B.java", "h-b"),
        ],
        None,
    )
    .await;
    mount_absent(&server, "a/B.java").await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/mod/contents/a/B.java"))
        .and(body_partial_json(json!({
            "message": "Create a/B.java",
            "content": "WA=="
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "content": { "sha": "h-b" } })))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    workspace.create_file_with_content("a/B.java", "X").await.unwrap();

    let tree = workspace.tree().await;
    assert!(tree.find("a").unwrap().is_directory());
    assert_eq!(tree.status_of("a/B.java"), Some(FileStatus::New));

    let outcome = workspace.sync_all().await;
    assert_eq!(
        outcome,
        SyncOutcome::Completed(SyncReport {
            pushed: vec!["a/B.java".to_string()],
            failed: Vec::new(),
        })
    );
    assert_eq!(
        workspace.tree().await.status_of("a/B.java"),
        Some(FileStatus::Synced)
    );
    assert!(!workspace.has_unsynced_changes().await);
    assert!(matches!(
        workspace.builds.lock().await.state(),
        BuildState::WaitingForBuild { .. }
    ));
}

#[tokio::test]
async fn sync_without_changes_does_nothing() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h-readme")], None).await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    assert_eq!(workspace.sync_all().await, SyncOutcome::NothingToSync);
    assert_eq!(workspace.builds.lock().await.state(), &BuildState::Idle);
}

#[tokio::test]
async fn sync_reports_partial_failure_and_still_resets() {
    let server = MockServer::start().await;
    mount_listing(&server, Vec::new(), None).await;
    mount_absent(&server, "A.txt").await;
    mount_absent(&server, "B.txt").await;
    mount_write(&server, "A.txt", 201, "h-a").await;
    mount_write(&server, "B.txt", 500, "unused").await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    workspace.create_file_with_content("A.txt", "A").await.unwrap();
    workspace.create_file_with_content("B.txt", "B").await.unwrap();

    let SyncOutcome::Completed(report) = workspace.sync_all().await else {
        panic!("expected a completed sync");
    };
    assert_eq!(report.pushed, vec!["A.txt".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "B.txt");
    assert!(!report.is_clean());

    assert!(!workspace.has_unsynced_changes().await);
    assert!(workspace.content_of("B.txt").await.is_none());
    assert!(matches!(
        workspace.builds.lock().await.state(),
        BuildState::WaitingForBuild { .. }
    ));
}

#[tokio::test]
async fn local_edit_survives_periodic_refetch() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h1")], None).await;
    mount_contents(&server, "README.md", "h1", "aGk=").await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    assert_eq!(workspace.open_file("README.md").await.unwrap(), "hi");
    workspace.edit_file("README.md", "hi there").await.unwrap();

    assert!(workspace.refresh().await);

    assert_eq!(
        workspace.content_of("README.md").await.as_deref(),
        Some("hi there")
    );
    assert_eq!(
        workspace.tree().await.status_of("README.md"),
        Some(FileStatus::Modified)
    );
    assert_eq!(
        workspace.active_file().await,
        Some(("README.md".to_string(), "hi there".to_string()))
    );
}

#[tokio::test]
async fn open_failure_leaves_state_untouched() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h1")], None).await;
    mount_absent(&server, "README.md").await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    let err = workspace.open_file("README.md").await.unwrap_err();
    assert!(matches!(err, WorkspaceError::Load { ref path, .. } if path == "README.md"));
    assert!(workspace.content_of("README.md").await.is_none());
    assert!(workspace.active_file().await.is_none());
}

#[tokio::test]
async fn failed_refresh_is_silent() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h1")], Some(1)).await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/mod/git/trees/main"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    assert!(!workspace.refresh().await);
    assert!(workspace.exists("README.md").await);
}

#[tokio::test]
async fn delete_is_optimistic_until_listing_confirms() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        vec![blob("README.md", "h-readme"), blob("old.txt", "h1")],
        Some(2),
    )
    .await;
    mount_listing(&server, vec![blob("README.md", "h-readme")], None).await;
    Mock::given(method("DELETE"))
        .and(path("/repos/octo/mod/contents/old.txt"))
        .and(body_partial_json(json!({ "sha": "h1", "message": "Delete old.txt" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commit": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    assert_eq!(workspace.delete_entry("old.txt").await.unwrap(), 1);
    assert!(!workspace.exists("old.txt").await);
    workspace.wait_for_background_deletes().await;

    assert!(workspace.refresh().await);
    assert!(!workspace.exists("old.txt").await);
    assert!(
        workspace
            .state
            .lock()
            .await
            .tracker()
            .is_pending_deletion("old.txt")
    );

    assert!(workspace.refresh().await);
    assert!(
        !workspace
            .state
            .lock()
            .await
            .tracker()
            .is_pending_deletion("old.txt")
    );
}

#[tokio::test]
async fn overlapping_deletes_issue_one_remote_call() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        vec![tree_dir("src"), blob("src/Mod.java", "h-mod")],
        None,
    )
    .await;
    Mock::given(method("DELETE"))
        .and(path("/repos/octo/mod/contents/src/Mod.java"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commit": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    assert_eq!(workspace.delete_entry("src/Mod.java").await.unwrap(), 1);
    assert!(matches!(
        workspace.delete_entry("src").await,
        Err(WorkspaceError::NotFound(_))
    ));
    workspace.wait_for_background_deletes().await;
}

#[tokio::test]
async fn background_delete_retries_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/repos/octo/mod/contents/old.txt"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/repos/octo/mod/contents/old.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commit": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GithubClient::with_base_url(&server.uri(), "t", "octo", "mod").unwrap();
    let job = DeleteJob {
        path: "old.txt".to_string(),
        hash: Some("h1".to_string()),
    };
    delete_remote(client, job, RetryPolicy::immediate(3)).await;
}

#[tokio::test]
async fn background_delete_does_not_retry_conflicts() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/repos/octo/mod/contents/old.txt"))
        .respond_with(ResponseTemplate::new(409).set_body_string("sha mismatch"))
        .expect(1)
        .mount(&server)
        .await;

    let client = GithubClient::with_base_url(&server.uri(), "t", "octo", "mod").unwrap();
    let job = DeleteJob {
        path: "old.txt".to_string(),
        hash: Some("stale".to_string()),
    };
    delete_remote(client, job, RetryPolicy::immediate(3)).await;
}

#[tokio::test]
async fn background_delete_looks_up_unknown_hash() {
    let server = MockServer::start().await;
    mount_contents(&server, "old.txt", "h-current", "aGk=").await;
    Mock::given(method("DELETE"))
        .and(path("/repos/octo/mod/contents/old.txt"))
        .and(body_partial_json(json!({ "sha": "h-current" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commit": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GithubClient::with_base_url(&server.uri(), "t", "octo", "mod").unwrap();
    let job = DeleteJob {
        path: "old.txt".to_string(),
        hash: None,
    };
    delete_remote(client, job, RetryPolicy::immediate(3)).await;
}

#[tokio::test]
async fn rename_requires_sync_when_other_changes_exist() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h-readme")], None).await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    workspace.create_file("notes.txt").await.unwrap();

    assert!(matches!(
        workspace.rename_entry("README.md", "README.txt").await,
        Err(WorkspaceError::UnsyncedChanges)
    ));
    assert!(workspace.exists("README.md").await);
}

#[tokio::test]
async fn rename_moves_file_and_deletes_old_path() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        vec![tree_dir("src"), blob("src/Mod.java", "h-mod")],
        None,
    )
    .await;
    mount_contents(&server, "src/Mod.java", "h-mod", "Y2xhc3MgTW9kIHt9").await;
    mount_absent(&server, "src/Main.java").await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/mod/contents/src/Main.java"))
        .and(body_partial_json(json!({
            "message": "Rename src/Mod.java to src/Main.java",
            "content": "Y2xhc3MgTW9kIHt9"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "content": { "sha": "h-main" } })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/repos/octo/mod/contents/src/Mod.java"))
        .and(body_partial_json(json!({ "sha": "h-mod" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commit": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    workspace
        .rename_entry("src/Mod.java", "src/Main.java")
        .await
        .unwrap();
    workspace.wait_for_background_deletes().await;

    let tree = workspace.tree().await;
    assert!(!tree.contains("src/Mod.java"));
    assert_eq!(tree.status_of("src/Main.java"), Some(FileStatus::Synced));
    assert!(!workspace.has_unsynced_changes().await);
}

#[tokio::test]
async fn rename_into_itself_is_rejected() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![tree_dir("src"), blob("src/Mod.java", "h")], None).await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    assert!(matches!(
        workspace.rename_entry("src", "src/inner").await,
        Err(WorkspaceError::InvalidTarget(_))
    ));
}

#[tokio::test]
async fn rename_leaves_state_untouched_when_target_appears_meanwhile() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        vec![
            tree_dir("src"),
            blob("src/A.java", "h-a"),
            blob("src/B.java", "h-b"),
        ],
        Some(1),
    )
    .await;
    mount_listing(
        &server,
        vec![
            tree_dir("src"),
            blob("src/A.java", "h-a"),
            blob("src/B.java", "h-b"),
            tree_dir("lib"),
            blob("lib/B.java", "h-lib"),
        ],
        None,
    )
    .await;
    for (file, sha) in [("src/A.java", "h-a"), ("src/B.java", "h-b")] {
        Mock::given(method("GET"))
            .and(path(format!("/repos/octo/mod/contents/{file}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_millis(300))
                    .set_body_json(json!({ "sha": sha, "encoding": "base64", "content": "eA==" })),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "content": { "sha": "x" } })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    let (renamed, refreshed) = tokio::join!(workspace.rename_entry("src", "lib"), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        workspace.refresh().await
    });
    workspace.wait_for_background_deletes().await;

    assert!(refreshed);
    assert!(matches!(renamed, Err(WorkspaceError::AlreadyExists(target)) if target == "lib/B.java"));
    let tree = workspace.tree().await;
    assert_eq!(tree.status_of("src/A.java"), Some(FileStatus::Synced));
    assert_eq!(tree.status_of("lib/A.java"), None);
    assert!(!workspace.has_unsynced_changes().await);
}

#[tokio::test]
async fn copy_creates_new_local_file() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        vec![blob("README.md", "h1"), tree_dir("src"), blob("src/Mod.java", "h-mod")],
        None,
    )
    .await;
    mount_contents(&server, "README.md", "h1", "aGk=").await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    let target = workspace.copy_entry("README.md", "src").await.unwrap();
    assert_eq!(target, "src/README.md");
    assert_eq!(
        workspace.tree().await.status_of("src/README.md"),
        Some(FileStatus::New)
    );
    assert_eq!(workspace.content_of("src/README.md").await.as_deref(), Some("hi"));

    assert!(matches!(
        workspace.copy_entry("README.md", "README.md").await,
        Err(WorkspaceError::NotADirectory(_))
    ));
}

#[tokio::test]
async fn save_writes_against_loaded_hash() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h1")], None).await;
    mount_contents(&server, "README.md", "h1", "aGk=").await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/mod/contents/README.md"))
        .and(body_partial_json(json!({
            "message": "Update README.md",
            "sha": "h1",
            "content": "aGkgdGhlcmU="
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": { "sha": "h2" } })))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    workspace.open_file("README.md").await.unwrap();
    workspace.edit_file("README.md", "hi there").await.unwrap();

    assert!(workspace.save_file("README.md").await.unwrap());
    assert!(!workspace.has_unsynced_changes().await);
    assert!(!workspace.save_file("README.md").await.unwrap());
}

#[tokio::test]
async fn save_with_stale_hash_is_a_conflict() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h1")], None).await;
    mount_contents(&server, "README.md", "h1", "aGk=").await;
    mount_write(&server, "README.md", 409, "unused").await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    workspace.open_file("README.md").await.unwrap();
    workspace.edit_file("README.md", "hi there").await.unwrap();

    assert!(matches!(
        workspace.save_file("README.md").await,
        Err(WorkspaceError::Conflict(_))
    ));
    assert!(workspace.has_unsynced_changes().await);
}

#[tokio::test]
async fn context_summary_lists_active_file_and_tree() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        vec![blob("README.md", "h1"), tree_dir("src"), blob("src/Mod.java", "h-mod")],
        None,
    )
    .await;

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    assert_eq!(
        workspace.context_summary().await,
        "Current File: None\nFile Tree: src/Mod.java, README.md"
    );
}

#[tokio::test]
async fn import_uploads_local_file_into_directory() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![tree_dir("assets"), blob("assets/logo.png", "h-logo")], Some(1)).await;
    mount_listing(
        &server,
        vec![
            tree_dir("assets"),
            blob("assets/logo.png", "h-logo"),
            blob("assets/icon.png", "h-icon"),
        ],
        None,
    )
    .await;
    mount_absent(&server, "assets/icon.png").await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/mod/contents/assets/icon.png"))
        .and(body_partial_json(json!({
            "message": "Import icon.png",
            "content": "iVBORw=="
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "content": { "sha": "h-icon" } })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("icon.png");
    std::fs::write(&local, [0x89, b'P', b'N', b'G']).unwrap();

    let workspace = workspace(&server);
    workspace.load().await.unwrap();
    let target = workspace.import_file(&local, "assets").await.unwrap();

    assert_eq!(target, "assets/icon.png");
    assert_eq!(
        workspace.tree().await.status_of("assets/icon.png"),
        Some(FileStatus::Synced)
    );
    assert!(!workspace.has_unsynced_changes().await);
    assert!(matches!(
        workspace.builds.lock().await.state(),
        BuildState::WaitingForBuild { .. }
    ));
}

#[tokio::test]
async fn import_refuses_bad_targets() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![blob("README.md", "h1")], None).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "content": { "sha": "x" } })))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("notes.txt");
    std::fs::write(&local, "draft").unwrap();

    let workspace = workspace(&server);
    workspace.load().await.unwrap();

    assert!(matches!(
        workspace.import_file(&local, "README.md").await,
        Err(WorkspaceError::NotADirectory(_))
    ));

    workspace.create_file("notes.txt").await.unwrap();
    assert!(matches!(
        workspace.import_file(&local, "").await,
        Err(WorkspaceError::UnsyncedChanges)
    ));

    assert!(matches!(
        workspace.import_file(&dir.path().join("missing.bin"), "").await,
        Err(WorkspaceError::Import { .. })
    ));
}
