use modforge_core::{ChatTurn, CompletionError, GeminiClient};
use tracing::warn;

use crate::actions::{ActionReport, AssistantReply, parse_reply};
use crate::workspace::Workspace;

/// Result of one exchange with the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantTurn {
    pub display: String,
    /// Present when the reply carried file actions.
    pub report: Option<ActionReport>,
}

/// Conversation with the completion service, bound to one workspace session.
pub struct Assistant {
    client: GeminiClient,
    history: Vec<ChatTurn>,
}

impl Assistant {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Sends `message` with the current project context, applies any returned file
    /// actions and records both turns.
    pub async fn ask(&mut self, workspace: &Workspace, message: &str) -> AssistantTurn {
        let context = workspace.context_summary().await;
        let turn = match self.client.chat(message, Some(&context), &self.history).await {
            Ok(raw) => match parse_reply(&raw) {
                AssistantReply::Structured(payload) => {
                    let report = workspace.apply_actions(&payload.actions).await;
                    AssistantTurn {
                        display: compose_display(&payload.text, &report),
                        report: Some(report),
                    }
                }
                AssistantReply::Plain(text) => AssistantTurn {
                    display: text,
                    report: None,
                },
            },
            Err(err) => {
                warn!(error = %err, "completion request failed");
                AssistantTurn {
                    display: describe_failure(&err, self.client.model()),
                    report: None,
                }
            }
        };

        self.history.push(ChatTurn::user(message));
        self.history.push(ChatTurn::model(turn.display.clone()));
        turn
    }
}

pub fn compose_display(text: &str, report: &ActionReport) -> String {
    if report.applied.is_empty() && report.failed.is_empty() {
        return text.to_string();
    }
    if report.is_clean() {
        return format!("{text}\n\nProject updated: {} file(s) changed.", report.applied.len());
    }
    let failed: Vec<String> = report
        .failed
        .iter()
        .map(|failure| format!("- {}: {}", failure.path, failure.message))
        .collect();
    format!(
        "{text}\n\nSome actions could not be applied ({} of {}):\n{}",
        report.failed.len(),
        report.failed.len() + report.applied.len(),
        failed.join("\n")
    )
}

fn describe_failure(err: &CompletionError, model: &str) -> String {
    if err.is_quota_exceeded() {
        format!("Quota exceeded for model {model}. Wait a minute or switch to a model with higher limits.")
    } else {
        format!("Error communicating with the assistant: {err}")
    }
}
