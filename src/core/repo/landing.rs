//! Landing protocols: staged writes become a pull request or a direct push.
//!
//! Files are committed one at a time in staging order. The first failure
//! stops the sequence; files committed before it stay committed.

use thiserror::Error;

use super::{HostError, NewPullRequest, PutFile, RepoHost};
use crate::core::agent::{LandingResult, StagedWrite};

/// Why a landing attempt failed.
#[derive(Debug, Error)]
pub enum LandingError {
    #[error("No files were written, nothing to land")]
    NothingStaged,

    #[error("could not resolve the default branch: {0}")]
    DefaultBranch(#[source] HostError),

    #[error("failed to create branch '{branch}': {source}")]
    CreateBranch {
        branch: String,
        #[source]
        source: HostError,
    },

    #[error("failed to commit {path} after {committed} file(s) were committed: {source}")]
    CommitFile {
        path: String,
        committed: usize,
        #[source]
        source: HostError,
    },

    #[error("failed to open a pull request from '{branch}': {source}")]
    PullRequest {
        branch: String,
        #[source]
        source: HostError,
    },
}

/// What the model asked for when opening a pull request.
#[derive(Debug, Clone)]
pub struct PullRequestDraft<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub branch_name: &'a str,
}

/// Branch names are trimmed and inner whitespace becomes `-`.
#[must_use]
pub fn sanitize_branch_name(name: &str) -> String {
    let name = name.split_whitespace().collect::<Vec<_>>().join("-");
    if name.is_empty() {
        format!(
            "repo-pilot/{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        )
    } else {
        name
    }
}

fn pull_request_body(body: &str, writes: &[StagedWrite]) -> String {
    let mut out = body.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str("### Files changed\n");
    for write in writes {
        out.push_str(&format!("\n- `{}`: {}", write.path, write.description));
    }
    out
}

/// Commit `writes` to `branch`; returns the last commit hash.
async fn commit_files(
    host: &dyn RepoHost,
    writes: &[StagedWrite],
    branch: &str,
    message_for: impl Fn(&StagedWrite) -> String,
) -> Result<String, LandingError> {
    let mut last_sha = String::new();

    for (committed, write) in writes.iter().enumerate() {
        let fail = |source| LandingError::CommitFile {
            path: write.path.clone(),
            committed,
            source,
        };

        let existing = host.file_sha(&write.path, branch).await.map_err(fail)?;

        let message = message_for(write);
        last_sha = host
            .put_file(PutFile {
                path: &write.path,
                content: &write.content,
                message: &message,
                branch,
                sha: existing.as_deref(),
            })
            .await
            .map_err(fail)?;

        tracing::debug!(path = %write.path, branch, sha = %last_sha, "file committed");
    }

    Ok(last_sha)
}

/// Create a branch off the default branch, commit every write to it and
/// open a pull request back to the default branch.
///
/// `writes` must already be flattened.
///
/// # Errors
///
/// Returns an error if nothing is staged or any remote step fails.
pub async fn open_pull_request(
    host: &dyn RepoHost,
    writes: &[StagedWrite],
    draft: &PullRequestDraft<'_>,
) -> Result<LandingResult, LandingError> {
    if writes.is_empty() {
        return Err(LandingError::NothingStaged);
    }

    let base = host
        .default_branch()
        .await
        .map_err(LandingError::DefaultBranch)?;
    let head_sha = host
        .branch_head(&base)
        .await
        .map_err(LandingError::DefaultBranch)?;

    let branch = sanitize_branch_name(draft.branch_name);
    tracing::info!(branch = %branch, base = %base, files = writes.len(), "landing as pull request");

    host.create_branch(&branch, &head_sha)
        .await
        .map_err(|source| LandingError::CreateBranch {
            branch: branch.clone(),
            source,
        })?;

    commit_files(host, writes, &branch, |w| w.description.clone()).await?;

    let body = pull_request_body(draft.body, writes);
    let pr = host
        .create_pull_request(NewPullRequest {
            title: draft.title,
            body: &body,
            head: &branch,
            base: &base,
        })
        .await
        .map_err(|source| LandingError::PullRequest {
            branch: branch.clone(),
            source,
        })?;

    Ok(LandingResult::PullRequest {
        url: pr.url,
        number: pr.number,
        branch,
    })
}

/// Commit every write straight to the default branch.
///
/// `writes` must already be flattened.
///
/// # Errors
///
/// Returns an error if nothing is staged or any remote step fails.
pub async fn push_direct(
    host: &dyn RepoHost,
    writes: &[StagedWrite],
    commit_message: &str,
) -> Result<LandingResult, LandingError> {
    if writes.is_empty() {
        return Err(LandingError::NothingStaged);
    }

    let branch = host
        .default_branch()
        .await
        .map_err(LandingError::DefaultBranch)?;
    tracing::info!(branch = %branch, files = writes.len(), "landing as direct push");

    let commit_sha = commit_files(host, writes, &branch, |_| commit_message.to_string()).await?;

    Ok(LandingResult::DirectPush {
        commit_sha,
        files: writes.len(),
    })
}
