//! Error types for the core module.

use super::repo::HostError;
use super::storage::StorageError;

/// Core error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No repository is configured under this key.
    #[error("unknown repository '{0}'")]
    UnknownRepository(String),

    /// No token could be found for the repository.
    #[error("no GitHub token for '{0}' (set GITHUB_TOKEN or run `repo-pilot auth login --github {0}`)")]
    MissingCredential(String),

    /// The remote host could not be reached or configured.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Run history could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
