use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::workspace::{Workspace, WorkspaceError, paths};

/// One file change requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileAction {
    Create {
        path: String,
        #[serde(default)]
        content: String,
    },
    Update {
        path: String,
        #[serde(default)]
        content: String,
    },
    Delete {
        path: String,
    },
}

impl FileAction {
    pub fn path(&self) -> &str {
        match self {
            FileAction::Create { path, .. }
            | FileAction::Update { path, .. }
            | FileAction::Delete { path } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPayload {
    pub text: String,
    pub actions: Vec<FileAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantReply {
    Structured(ActionPayload),
    /// Anything that is not a well-formed payload, kept verbatim.
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    actions: Option<Vec<FileAction>>,
}

/// Extracts the structured payload from a completion: a ```json fenced block if
/// present, otherwise a reply that is a bare JSON object.
pub fn parse_reply(raw: &str) -> AssistantReply {
    let parsed = fenced_json(raw)
        .or_else(|| bare_object(raw))
        .and_then(|candidate| match serde_json::from_str::<WirePayload>(candidate) {
            Ok(wire) => Some(wire),
            Err(err) => {
                debug!(error = %err, "reply payload did not parse");
                None
            }
        })
        .filter(|wire| wire.text.is_some() || wire.actions.is_some());

    match parsed {
        Some(wire) => AssistantReply::Structured(ActionPayload {
            text: wire.text.unwrap_or_default(),
            actions: wire.actions.unwrap_or_default(),
        }),
        None => AssistantReply::Plain(raw.to_string()),
    }
}

fn fenced_json(raw: &str) -> Option<&str> {
    let start = raw.find("```json")?;
    let after_tag = &raw[start + "```json".len()..];
    let body_start = after_tag.find('\n')? + 1;
    let body = &after_tag[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn bare_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}')).then_some(trimmed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    pub applied: Vec<String>,
    pub failed: Vec<ActionFailure>,
}

impl ActionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Workspace {
    /// Applies assistant actions through the same operations a user edit takes.
    /// Failures are collected per action.
    pub async fn apply_actions(&self, actions: &[FileAction]) -> ActionReport {
        let mut report = ActionReport::default();
        for action in actions {
            let result = match action {
                FileAction::Create { path, content } | FileAction::Update { path, content } => {
                    self.write_through(path, content).await
                }
                FileAction::Delete { path } => self.delete_entry(path).await.map(|_| ()),
            };
            match result {
                Ok(()) => report.applied.push(action.path().to_string()),
                Err(err) => {
                    warn!(path = %action.path(), error = %err, "assistant action failed");
                    report.failed.push(ActionFailure {
                        path: action.path().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Create-or-update: existing files are opened and edited, unknown ones created.
    async fn write_through(&self, path: &str, content: &str) -> Result<(), WorkspaceError> {
        let path = paths::normalize(path)?;
        if self.exists(&path).await {
            self.open_file(&path).await?;
            self.edit_file(&path, content).await
        } else {
            self.create_file_with_content(&path, content).await
        }
    }
}
