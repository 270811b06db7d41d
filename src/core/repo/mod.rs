//! Remote repository access.
//!
//! [`RepoHost`] is the set of remote operations a run needs. [`GithubClient`]
//! implements it over the GitHub REST API; [`RepositoryAdapter`] turns tool
//! calls into host operations and owns the staging buffer for one run.

mod adapter;
mod github;
pub mod landing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use adapter::{RepositoryAdapter, ToolEffect, ToolExecution};
pub use github::{DEFAULT_API_URL, GithubClient};
pub use landing::LandingError;

/// Errors from a single remote call.
#[derive(Debug, Error)]
pub enum HostError {
    /// The path, ref or repository does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote rejected a write because of existing state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport failure
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response did not have the expected shape
    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl HostError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Owner, name and credential of the repository a run works on.
#[derive(Clone, PartialEq, Eq)]
pub struct RepositoryCoordinates {
    pub owner: String,
    pub repo: String,
    pub token: String,
}

impl RepositoryCoordinates {
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
        }
    }

    /// `owner/repo`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Debug for RepositoryCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryCoordinates")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A file's decoded content and blob hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    #[must_use]
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    #[must_use]
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Dir,
        }
    }
}

/// What lives at a listed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryListing {
    Entries(Vec<DirEntry>),
    /// The path names a file
    File,
}

/// Create-or-update of one file on a branch.
#[derive(Debug, Clone, Copy)]
pub struct PutFile<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub message: &'a str,
    pub branch: &'a str,
    /// Current blob hash; present only when updating an existing file
    pub sha: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewPullRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub head: &'a str,
    pub base: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
}

/// Remote operations against one repository.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Name of the default branch.
    async fn default_branch(&self) -> Result<String>;

    /// Commit hash a branch points at.
    async fn branch_head(&self, branch: &str) -> Result<String>;

    /// Create `branch` pointing at `sha`.
    async fn create_branch(&self, branch: &str, sha: &str) -> Result<()>;

    /// File at `path` on `git_ref` (default branch when `None`); `None` if absent.
    async fn get_file(&self, path: &str, git_ref: Option<&str>) -> Result<Option<RemoteFile>>;

    /// Blob hash of the file at `path` on `git_ref`; `None` if absent.
    ///
    /// Never decodes content, so binary and oversized files still resolve.
    async fn file_sha(&self, path: &str, git_ref: &str) -> Result<Option<String>>;

    /// Entries at `path`; the empty path is the root.
    async fn list_directory(&self, path: &str) -> Result<DirectoryListing>;

    /// Paths of files matching `query`.
    async fn search_code(&self, query: &str, extension: Option<&str>) -> Result<Vec<String>>;

    /// Commit one file; returns the new commit hash.
    async fn put_file(&self, file: PutFile<'_>) -> Result<String>;

    async fn create_pull_request(&self, pr: NewPullRequest<'_>) -> Result<PullRequest>;
}

/// Opens a [`RepoHost`] for resolved coordinates.
pub trait HostConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    fn connect(&self, coordinates: &RepositoryCoordinates) -> Result<Arc<dyn RepoHost>>;
}

/// Connects to GitHub (or GitHub Enterprise) at `api_url`.
#[derive(Debug, Clone)]
pub struct GithubConnector {
    api_url: String,
}

impl GithubConnector {
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }
}

impl Default for GithubConnector {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl HostConnector for GithubConnector {
    fn connect(&self, coordinates: &RepositoryCoordinates) -> Result<Arc<dyn RepoHost>> {
        let client = GithubClient::new(&self.api_url, coordinates.clone())?;
        Ok(Arc::new(client))
    }
}

/// Looks up repository coordinates by a caller-facing key.
pub trait RepositoryDirectory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the key is unknown or no credential is available.
    fn resolve(&self, key: &str) -> crate::core::Result<RepositoryCoordinates>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_debug_hides_token() {
        let coords = RepositoryCoordinates::new("omnidotdev", "cli", "ghp_secret");
        let debug = format!("{coords:?}");
        assert!(debug.contains("omnidotdev"));
        assert!(!debug.contains("ghp_secret"));
        assert_eq!(coords.full_name(), "omnidotdev/cli");
    }

    #[test]
    fn not_found_is_detected() {
        assert!(HostError::NotFound("x".into()).is_not_found());
        assert!(!HostError::Conflict("x".into()).is_not_found());
    }
}
