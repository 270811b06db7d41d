//! In-memory doubles for the model and the repository host.
//!
//! Compiled for unit tests and behind the `test-support` feature for the
//! integration tests in `tests/`.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use agent_core::error::{AgentError, Result as AgentResult};
use agent_core::provider::{CompletionEvent, CompletionRequest, CompletionStream, LlmProvider};
use agent_core::types::{ContentBlock, StopReason};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::history::{RunRecorder, RunSummary};
use super::repo::{
    DirEntry, DirectoryListing, HostConnector, HostError, NewPullRequest, PullRequest, PutFile,
    RemoteFile, RepoHost, RepositoryCoordinates, RepositoryDirectory, Result,
};

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Prose only; ends the run.
    Text(String),
    /// Optional prose followed by tool calls.
    Tools {
        text: String,
        calls: Vec<(String, serde_json::Value)>,
    },
    /// Prose and tool calls ending with an explicit stop reason.
    Stopped {
        text: String,
        calls: Vec<(String, serde_json::Value)>,
        stop_reason: StopReason,
    },
    /// The model call fails.
    Fail(String),
}

impl ScriptedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn tools<'a>(
        text: impl Into<String>,
        calls: impl IntoIterator<Item = (&'a str, serde_json::Value)>,
    ) -> Self {
        Self::Tools {
            text: text.into(),
            calls: calls
                .into_iter()
                .map(|(name, input)| (name.to_string(), input))
                .collect(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    /// Same turn, reported with `stop_reason` instead of the inferred one.
    #[must_use]
    pub fn stopped_by(self, stop_reason: StopReason) -> Self {
        let (text, calls) = match self {
            Self::Text(text) => (text, Vec::new()),
            Self::Tools { text, calls } | Self::Stopped { text, calls, .. } => (text, calls),
            Self::Fail(message) => return Self::Fail(message),
        };
        Self::Stopped {
            text,
            calls,
            stop_reason,
        }
    }
}

/// Replays scripted turns as streamed completions.
///
/// Once the script runs out it answers with a short text turn, or with the
/// turn given to [`ScriptedProvider::repeat_forever`].
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedTurn>>,
    forever: Option<ScriptedTurn>,
    requests: Mutex<Vec<CompletionRequest>>,
    next_id: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn repeat_forever(mut self, turn: ScriptedTurn) -> Self {
        self.forever = Some(turn);
        self
    }

    /// Number of model calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    fn next_turn(&self) -> ScriptedTurn {
        self.script
            .lock()
            .pop_front()
            .or_else(|| self.forever.clone())
            .unwrap_or_else(|| ScriptedTurn::text("Nothing left to do."))
    }

    fn events(&self, turn: ScriptedTurn) -> AgentResult<Vec<CompletionEvent>> {
        let (text, calls, stop_reason) = match turn {
            ScriptedTurn::Text(text) => (text, Vec::new(), None),
            ScriptedTurn::Tools { text, calls } => (text, calls, None),
            ScriptedTurn::Stopped {
                text,
                calls,
                stop_reason,
            } => (text, calls, Some(stop_reason)),
            ScriptedTurn::Fail(message) => {
                return Err(AgentError::Api {
                    status: 500,
                    message,
                });
            }
        };

        let mut events = Vec::new();
        if !text.is_empty() {
            events.push(CompletionEvent::TextDelta(text));
        }

        let stop_reason = stop_reason.unwrap_or(if calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        });

        for (offset, (name, input)) in calls.into_iter().enumerate() {
            let index = offset + 1;
            let id = format!("toolu_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            events.push(CompletionEvent::ToolUseStart {
                index,
                id: id.clone(),
                name: name.clone(),
            });
            events.push(CompletionEvent::ToolInputDelta {
                index,
                partial_json: input.to_string(),
            });
            events.push(CompletionEvent::ContentBlockDone {
                index,
                block: ContentBlock::ToolUse { id, name, input },
            });
        }

        events.push(CompletionEvent::Done {
            stop_reason: Some(stop_reason),
            usage: None,
        });
        Ok(events)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream(&self, request: CompletionRequest) -> AgentResult<CompletionStream> {
        self.requests.lock().push(request);
        let events = self.events(self.next_turn())?;
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

/// A call made against [`MemoryHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    DefaultBranch,
    BranchHead {
        branch: String,
    },
    CreateBranch {
        branch: String,
        sha: String,
    },
    GetFile {
        path: String,
        git_ref: Option<String>,
    },
    FileSha {
        path: String,
        git_ref: String,
    },
    ListDirectory {
        path: String,
    },
    SearchCode {
        query: String,
        extension: Option<String>,
    },
    PutFile {
        path: String,
        branch: String,
        message: String,
        had_sha: bool,
    },
    CreatePullRequest {
        title: String,
        body: String,
        head: String,
        base: String,
    },
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    sha: String,
}

#[derive(Debug, Default)]
struct Branch {
    head: String,
    files: BTreeMap<String, StoredFile>,
}

#[derive(Debug, Default)]
struct HostState {
    default_branch: String,
    branches: BTreeMap<String, Branch>,
    calls: Vec<HostCall>,
    fail_reads: bool,
    fail_puts: HashSet<String>,
    revision: usize,
    last_commit: Option<String>,
    pull_requests: u64,
}

impl HostState {
    fn next_revision(&mut self, prefix: &str) -> String {
        self.revision += 1;
        format!("{prefix}{:07}", self.revision)
    }

    fn branch(&self, name: &str) -> Result<&Branch> {
        self.branches
            .get(name)
            .ok_or_else(|| HostError::NotFound(format!("branch {name}")))
    }
}

/// A repository held in memory, with GitHub's conflict rules.
#[derive(Debug)]
pub struct MemoryHost {
    state: Mutex<HostState>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// An empty repository whose default branch is `main`.
    pub fn new() -> Self {
        let mut state = HostState {
            default_branch: "main".to_string(),
            ..HostState::default()
        };
        let head = state.next_revision("commit-");
        state.branches.insert(
            "main".to_string(),
            Branch {
                head,
                files: BTreeMap::new(),
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    /// Seed a file on a branch, creating the branch if needed.
    #[must_use]
    pub fn with_file(self, branch: &str, path: &str, content: &str) -> Self {
        {
            let mut state = self.state.lock();
            let sha = state.next_revision("blob-");
            let head = state.next_revision("commit-");
            let entry = state.branches.entry(branch.to_string()).or_default();
            entry.head = head;
            entry.files.insert(
                path.to_string(),
                StoredFile {
                    content: content.to_string(),
                    sha,
                },
            );
        }
        self
    }

    /// Seed an existing branch copied from the default branch.
    #[must_use]
    pub fn with_branch(self, branch: &str) -> Self {
        {
            let mut state = self.state.lock();
            let default = state.default_branch.clone();
            let files = state
                .branches
                .get(&default)
                .map(|b| b.files.clone())
                .unwrap_or_default();
            let head = state.next_revision("commit-");
            state
                .branches
                .insert(branch.to_string(), Branch { head, files });
        }
        self
    }

    /// Every content read fails with a server error; sha lookups still succeed.
    #[must_use]
    pub fn fail_reads(self) -> Self {
        self.state.lock().fail_reads = true;
        self
    }

    /// Commits to `path` fail with a server error.
    #[must_use]
    pub fn fail_put_on(self, path: &str) -> Self {
        self.state.lock().fail_puts.insert(path.to_string());
        self
    }

    /// Current content of a file on a branch.
    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .branches
            .get(branch)
            .and_then(|b| b.files.get(path))
            .map(|f| f.content.clone())
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state.lock().calls.clone()
    }

    /// Sha of the most recent commit made through `put_file`.
    pub fn last_commit(&self) -> Option<String> {
        self.state.lock().last_commit.clone()
    }

    fn record(&self, call: HostCall) -> parking_lot::MutexGuard<'_, HostState> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state
    }
}

fn server_error(message: &str) -> HostError {
    HostError::Api {
        status: 500,
        message: message.to_string(),
    }
}

#[async_trait]
impl RepoHost for MemoryHost {
    async fn default_branch(&self) -> Result<String> {
        let state = self.record(HostCall::DefaultBranch);
        Ok(state.default_branch.clone())
    }

    async fn branch_head(&self, branch: &str) -> Result<String> {
        let state = self.record(HostCall::BranchHead {
            branch: branch.to_string(),
        });
        Ok(state.branch(branch)?.head.clone())
    }

    async fn create_branch(&self, branch: &str, sha: &str) -> Result<()> {
        let mut state = self.record(HostCall::CreateBranch {
            branch: branch.to_string(),
            sha: sha.to_string(),
        });
        if state.branches.contains_key(branch) {
            return Err(HostError::Conflict("Reference already exists".to_string()));
        }

        let files = state
            .branches
            .values()
            .find(|b| b.head == sha)
            .map(|b| b.files.clone())
            .ok_or_else(|| HostError::Conflict("Object does not exist".to_string()))?;
        state.branches.insert(
            branch.to_string(),
            Branch {
                head: sha.to_string(),
                files,
            },
        );
        Ok(())
    }

    async fn get_file(&self, path: &str, git_ref: Option<&str>) -> Result<Option<RemoteFile>> {
        let state = self.record(HostCall::GetFile {
            path: path.to_string(),
            git_ref: git_ref.map(str::to_string),
        });
        if state.fail_reads {
            return Err(server_error("read failed"));
        }

        let branch = git_ref.unwrap_or(&state.default_branch);
        Ok(state.branch(branch)?.files.get(path).map(|f| RemoteFile {
            content: f.content.clone(),
            sha: f.sha.clone(),
        }))
    }

    async fn file_sha(&self, path: &str, git_ref: &str) -> Result<Option<String>> {
        let state = self.record(HostCall::FileSha {
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        });
        Ok(state.branch(git_ref)?.files.get(path).map(|f| f.sha.clone()))
    }

    async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        let state = self.record(HostCall::ListDirectory {
            path: path.to_string(),
        });
        let files = &state.branch(&state.default_branch)?.files;
        if files.contains_key(path) {
            return Ok(DirectoryListing::File);
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for key in files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => entries.push(DirEntry::file(rest)),
            }
        }

        if dirs.is_empty() && entries.is_empty() && !path.is_empty() {
            return Err(HostError::NotFound(path.to_string()));
        }
        entries.extend(dirs.into_iter().map(DirEntry::dir));
        Ok(DirectoryListing::Entries(entries))
    }

    async fn search_code(&self, query: &str, extension: Option<&str>) -> Result<Vec<String>> {
        let state = self.record(HostCall::SearchCode {
            query: query.to_string(),
            extension: extension.map(str::to_string),
        });
        let files = &state.branch(&state.default_branch)?.files;
        Ok(files
            .iter()
            .filter(|(path, _)| extension.is_none_or(|ext| path.ends_with(&format!(".{ext}"))))
            .filter(|(_, file)| file.content.contains(query))
            .map(|(path, _)| path.clone())
            .collect())
    }

    async fn put_file(&self, file: PutFile<'_>) -> Result<String> {
        let mut state = self.record(HostCall::PutFile {
            path: file.path.to_string(),
            branch: file.branch.to_string(),
            message: file.message.to_string(),
            had_sha: file.sha.is_some(),
        });
        if state.fail_puts.contains(file.path) {
            return Err(server_error("commit failed"));
        }

        let existing = state
            .branch(file.branch)?
            .files
            .get(file.path)
            .map(|f| f.sha.clone());
        match (existing.as_deref(), file.sha) {
            (Some(_), None) => {
                return Err(HostError::Conflict(format!(
                    "\"sha\" wasn't supplied for {}",
                    file.path
                )));
            }
            (current, Some(sha)) if current != Some(sha) => {
                return Err(HostError::Conflict(format!(
                    "{} does not match {sha}",
                    file.path
                )));
            }
            _ => {}
        }

        let sha = state.next_revision("blob-");
        let commit = state.next_revision("commit-");
        if let Some(branch) = state.branches.get_mut(file.branch) {
            branch.head.clone_from(&commit);
            branch.files.insert(
                file.path.to_string(),
                StoredFile {
                    content: file.content.to_string(),
                    sha,
                },
            );
        }
        state.last_commit = Some(commit.clone());
        Ok(commit)
    }

    async fn create_pull_request(&self, pr: NewPullRequest<'_>) -> Result<PullRequest> {
        let mut state = self.record(HostCall::CreatePullRequest {
            title: pr.title.to_string(),
            body: pr.body.to_string(),
            head: pr.head.to_string(),
            base: pr.base.to_string(),
        });
        state.branch(pr.head)?;
        state.branch(pr.base)?;

        state.pull_requests += 1;
        let number = state.pull_requests;
        Ok(PullRequest {
            url: format!("https://github.com/memory/repo/pull/{number}"),
            number,
        })
    }
}

/// Hands out one shared [`MemoryHost`] for every repository.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    host: Arc<MemoryHost>,
}

impl MemoryConnector {
    pub const fn new(host: Arc<MemoryHost>) -> Self {
        Self { host }
    }
}

impl HostConnector for MemoryConnector {
    fn connect(&self, _coordinates: &RepositoryCoordinates) -> Result<Arc<dyn RepoHost>> {
        Ok(self.host.clone())
    }
}

/// Resolves keys from a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    repositories: BTreeMap<String, RepositoryCoordinates>,
}

impl StaticDirectory {
    #[must_use]
    pub fn with(mut self, key: &str, owner: &str, repo: &str) -> Self {
        self.repositories.insert(
            key.to_string(),
            RepositoryCoordinates::new(owner, repo, "test-token"),
        );
        self
    }
}

impl RepositoryDirectory for StaticDirectory {
    fn resolve(&self, key: &str) -> super::Result<RepositoryCoordinates> {
        self.repositories
            .get(key)
            .cloned()
            .ok_or_else(|| super::Error::UnknownRepository(key.to_string()))
    }
}

/// Keeps run summaries in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    summaries: Mutex<Vec<RunSummary>>,
}

impl MemoryRecorder {
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().clone()
    }
}

impl RunRecorder for MemoryRecorder {
    fn record(&self, summary: &RunSummary) -> super::storage::Result<()> {
        self.summaries.lock().push(summary.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> super::storage::Result<Vec<RunSummary>> {
        let mut runs = self.summaries();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
