use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

const SYSTEM_INSTRUCTION: &str = "You are an expert Minecraft mod developer working inside a \
browser IDE. The project is a Forge or Fabric mod built with Gradle on GitHub Actions. \
Prefer complete, compilable Java files and keep package names consistent with the tree.";

/// Contract the reply parser in the IDE relies on.
pub const STRUCTURED_OUTPUT_INSTRUCTION: &str = r#"
When the user asks to create, update, delete or modify files you MUST return a single JSON
object with the code changes, optionally wrapped in a ```json fenced block:

{
  "text": "Brief explanation of what you did.",
  "actions": [
    { "type": "create", "path": "src/main/java/com/example/mod/ItemInit.java", "content": "package ..." },
    { "type": "update", "path": "src/main/resources/assets/modid/lang/en_us.json", "content": "{...}" },
    { "type": "delete", "path": "src/main/java/com/example/mod/Old.java" }
  ]
}

If you are only answering a question, reply with normal markdown text.
Always use full repository paths.
"#;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("completion returned no text")]
    EmptyResponse,
}

impl CompletionError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, CompletionError::Api { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CompletionError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, CompletionError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends `message` after `history`; `context` is appended to the system instruction.
    pub async fn chat(
        &self,
        message: &str,
        context: Option<&str>,
        history: &[ChatTurn],
    ) -> Result<String, CompletionError> {
        let url = self
            .base_url
            .join(&format!("/v1beta/models/{}:generateContent", self.model))?;

        let mut instruction = format!("{SYSTEM_INSTRUCTION}\n{STRUCTURED_OUTPUT_INSTRUCTION}");
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            instruction.push_str("\n\nCurrent Project Context:\n");
            instruction.push_str(context);
        }

        let mut contents: Vec<Content<'_>> = history
            .iter()
            .map(|turn| Content {
                role: turn.role,
                parts: vec![Part { text: &turn.text }],
            })
            .collect();
        contents.push(Content {
            role: ChatRole::User,
            parts: vec![Part { text: message }],
        });

        let body = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: &instruction,
                }],
            },
            contents,
        };

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let payload: GenerateResponse = response.json().await?;
        let text: String = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: ChatRole,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
