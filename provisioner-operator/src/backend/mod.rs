//! Repository backends
//!
//! A backend is the file store behind a repository (a local directory, a
//! git remote). Workers read and write JSON resource files through it and,
//! when the backend supports it, batch writes in a staging area that is
//! pushed once at the end.

mod git;
mod local;
mod stage;

use async_trait::async_trait;
use provisioner_core::domain::job::FileAction;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

pub use git::GitBackend;
pub use local::LocalBackend;
pub use stage::Stage;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid file {path}: {message}")]
    InvalidFile { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

/// A file-level difference between two backend revisions
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub action: FileAction,
    pub path: String,
    /// Source path of a move
    pub previous_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    /// One commit for all writes, made on push
    CommitOnlyOnce,
    /// One commit per write
    CommitPerWrite,
}

#[derive(Debug, Clone)]
pub struct StageOptions {
    pub mode: StageMode,
    pub commit_message: String,
    /// Push after every write instead of once at the end
    pub push_on_writes: bool,
    /// Branch or revision to stage on, when the backend has any
    pub git_ref: Option<String>,
    pub timeout: Duration,
}

impl StageOptions {
    pub fn commit_once(message: impl Into<String>) -> Self {
        Self {
            mode: StageMode::CommitOnlyOnce,
            commit_message: message.into(),
            push_on_writes: false,
            git_ref: None,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_ref(mut self, git_ref: Option<String>) -> Self {
        self.git_ref = git_ref;
        self
    }
}

/// File store behind a repository. Paths are relative and `/` separated;
/// a trailing `/` names a directory.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Paths of all resource files
    async fn list_files(&self) -> Result<Vec<String>, BackendError>;

    async fn read_file(&self, path: &str) -> Result<JsonValue, BackendError>;

    async fn write_file(
        &self,
        path: &str,
        body: &JsonValue,
        message: &str,
    ) -> Result<(), BackendError>;

    async fn delete_file(&self, path: &str, message: &str) -> Result<(), BackendError>;

    async fn move_file(&self, from: &str, to: &str, message: &str) -> Result<(), BackendError>;

    /// Checks that the backend is reachable and usable
    async fn test(&self) -> Result<(), BackendError>;

    /// Current revision, for versioned backends
    async fn latest_ref(&self) -> Result<Option<String>, BackendError> {
        Ok(None)
    }

    /// Files changed since `since`; `None` when the backend cannot diff
    async fn changes_since(&self, _since: &str) -> Result<Option<Vec<FileChange>>, BackendError> {
        Ok(None)
    }

    /// Opens a staging area; `None` when writes go straight to the backend
    async fn stage(
        &self,
        _options: &StageOptions,
    ) -> Result<Option<Box<dyn StagedBackend>>, BackendError> {
        Ok(None)
    }
}

/// Writes made through `writer` become visible once `push` succeeds
#[async_trait]
pub trait StagedBackend: Send + Sync {
    fn writer(&self) -> &dyn Backend;

    async fn push(&self) -> Result<(), BackendError>;
}
