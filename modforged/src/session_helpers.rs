fn build_client(config: &SessionConfig) -> anyhow::Result<GithubClient> {
    let client = match &config.api_base_url {
        Some(url) => GithubClient::with_base_url(url, &config.token, &config.owner, &config.repo),
        None => GithubClient::new(&config.token, &config.owner, &config.repo),
    }
    .context("failed to build GitHub client")?;
    Ok(match &config.branch {
        Some(branch) => client.with_branch(branch),
        None => client,
    })
}

fn build_assistant(config: &SessionConfig) -> anyhow::Result<Option<Assistant>> {
    let Some(key) = &config.gemini_api_key else {
        return Ok(None);
    };
    let mut client = GeminiClient::new(key).context("failed to build completion client")?;
    if let Some(model) = &config.gemini_model {
        client = client.with_model(model);
    }
    Ok(Some(Assistant::new(client)))
}

fn parse_repo_slug(slug: &str) -> anyhow::Result<(String, String)> {
    let trimmed = slug.trim().trim_end_matches(".git");
    let mut parts = trimmed.split('/').filter(|part| !part.is_empty());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) => Ok((owner.to_string(), repo.to_string())),
        _ => anyhow::bail!("repository must be given as owner/name, got {slug:?}"),
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_var<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_var<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn describe_sync(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::NothingToSync => "Nothing to sync.".to_string(),
        SyncOutcome::Completed(SyncReport { pushed, failed }) if failed.is_empty() => {
            format!("Synced {} file(s).", pushed.len())
        }
        SyncOutcome::Completed(SyncReport { pushed, failed }) => {
            let paths: Vec<&str> = failed.iter().map(|failure| failure.path.as_str()).collect();
            format!(
                "Synced {} file(s), {} failed: {}",
                pushed.len(),
                failed.len(),
                paths.join(", ")
            )
        }
    }
}

fn describe_build(progress: &BuildProgress) -> String {
    let mut line = match progress.state.run() {
        Some(run) => format!("{} (run {})", progress.state.label(), run.id),
        None => progress.state.label().to_string(),
    };
    if let Some(step) = progress
        .steps
        .iter()
        .find(|step| step.status != modforge_core::RunStatus::Completed)
    {
        line.push_str(&format!(", current step: {}", step.name));
    }
    if !progress.artifacts.is_empty() {
        let names: Vec<&str> = progress.artifacts.iter().map(|a| a.name.as_str()).collect();
        line.push_str(&format!(", artifacts: {}", names.join(", ")));
    }
    line
}

async fn save_artifacts(
    client: &GithubClient,
    artifacts: &[Artifact],
    dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    if artifacts.is_empty() {
        return Ok(Vec::new());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut saved = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let bytes = client
            .download_artifact(artifact)
            .await
            .with_context(|| format!("failed to download artifact {}", artifact.name))?;
        let file_name = format!("{}.zip", artifact.name.replace(['/', '\\'], "_"));
        let target = dir.join(file_name);
        tokio::fs::write(&target, &bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        info!(path = %target.display(), bytes = bytes.len(), "artifact saved");
        saved.push(target);
    }
    Ok(saved)
}
