mod client;
mod completion;

pub use client::{
    ApiErrorClass, Artifact, Blob, EntryKind, FileEntry, GithubClient, GithubError, Job, JobStep,
    Repository, RepositoryOwner, RunConclusion, RunStatus, User, WorkflowRun,
};
pub use completion::{
    ChatRole, ChatTurn, CompletionError, DEFAULT_MODEL, GeminiClient,
    STRUCTURED_OUTPUT_INSTRUCTION,
};
