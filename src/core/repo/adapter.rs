//! Tool execution against a [`RepoHost`].
//!
//! Every tool failure is turned into an `Error: ...` result for the model.
//! Only a failed landing escapes as [`LandingError`], since it ends the run.

use agent_core::provider::ToolUse;

use super::landing::{self, LandingError, PullRequestDraft};
use super::{DirectoryListing, EntryKind, RepoHost};
use crate::core::agent::tools::{
    CommitAndPushInput, CreatePullRequestInput, ListDirectoryInput, ReadFileInput,
    SearchCodeInput, ToolInput, WriteFileInput,
};
use crate::core::agent::{LandingMode, LandingResult, StagedWrite, StagingBuffer};

/// Files larger than this are truncated before reaching the model.
const MAX_READ_CHARS: usize = 100_000;

/// Side effect of a tool call worth reporting to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEffect {
    Staged {
        write: StagedWrite,
        original_content: Option<String>,
    },
    Landed(LandingResult),
}

/// Result text for the model plus any effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExecution {
    pub content: String,
    pub is_error: bool,
    pub effect: Option<ToolEffect>,
}

impl ToolExecution {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            effect: None,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error: {message}"),
            is_error: true,
            effect: None,
        }
    }

    fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Runs tool calls for one agent run and owns its staging buffer.
pub struct RepositoryAdapter<'h> {
    host: &'h dyn RepoHost,
    mode: LandingMode,
    staging: StagingBuffer,
    landing: Option<LandingResult>,
}

impl<'h> RepositoryAdapter<'h> {
    #[must_use]
    pub fn new(host: &'h dyn RepoHost, mode: LandingMode) -> Self {
        Self {
            host,
            mode,
            staging: StagingBuffer::new(),
            landing: None,
        }
    }

    #[must_use]
    pub const fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    #[must_use]
    pub const fn landing(&self) -> Option<&LandingResult> {
        self.landing.as_ref()
    }

    #[must_use]
    pub fn into_parts(self) -> (StagingBuffer, Option<LandingResult>) {
        (self.staging, self.landing)
    }

    /// Execute one tool call.
    ///
    /// # Errors
    ///
    /// Returns an error only when a landing tool fails remotely.
    pub async fn execute(&mut self, call: &ToolUse) -> Result<ToolExecution, LandingError> {
        let input = match ToolInput::parse(&call.name, &call.input, self.mode) {
            Ok(input) => input,
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "rejected tool call");
                return Ok(ToolExecution::error(e));
            }
        };

        match input {
            ToolInput::ReadFile(input) => Ok(self.read_file(&input).await),
            ToolInput::ListDirectory(input) => Ok(self.list_directory(&input).await),
            ToolInput::SearchCode(input) => Ok(self.search_code(&input).await),
            ToolInput::WriteFile(input) => Ok(self.write_file(input).await),
            ToolInput::CreatePullRequest(input) => self.create_pull_request(&input).await,
            ToolInput::CommitAndPush(input) => self.commit_and_push(&input).await,
        }
    }

    async fn read_file(&self, input: &ReadFileInput) -> ToolExecution {
        let path = normalize_path(&input.path);
        match self.host.get_file(path, None).await {
            Ok(Some(file)) => ToolExecution::ok(truncate(file.content, MAX_READ_CHARS)),
            Ok(None) => ToolExecution::error(format!("File not found: {path}")),
            Err(e) => ToolExecution::error(format!("Could not read {path}: {e}")),
        }
    }

    async fn list_directory(&self, input: &ListDirectoryInput) -> ToolExecution {
        let path = normalize_path(input.path.as_deref().unwrap_or_default());
        let shown = if path.is_empty() { "/" } else { path };

        let mut entries = match self.host.list_directory(path).await {
            Ok(DirectoryListing::Entries(entries)) => entries,
            Ok(DirectoryListing::File) => {
                return ToolExecution::ok(format!(
                    "{shown} is a file, not a directory. Use read_file to read it."
                ));
            }
            Err(e) if e.is_not_found() => {
                return ToolExecution::error(format!("Directory not found: {shown}"));
            }
            Err(e) => return ToolExecution::error(format!("Could not list {shown}: {e}")),
        };

        if entries.is_empty() {
            return ToolExecution::ok(format!("Directory {shown} is empty"));
        }

        entries.sort_by(|a, b| {
            (a.kind != EntryKind::Dir, &a.name).cmp(&(b.kind != EntryKind::Dir, &b.name))
        });

        let lines: Vec<String> = entries
            .into_iter()
            .map(|e| match e.kind {
                EntryKind::Dir => format!("{}/", e.name),
                EntryKind::File => e.name,
            })
            .collect();

        ToolExecution::ok(lines.join("\n"))
    }

    async fn search_code(&self, input: &SearchCodeInput) -> ToolExecution {
        match self
            .host
            .search_code(&input.query, input.file_extension.as_deref())
            .await
        {
            Ok(paths) if paths.is_empty() => {
                ToolExecution::ok(format!("No matches found for \"{}\"", input.query))
            }
            Ok(paths) => ToolExecution::ok(paths.join("\n")),
            Err(e) => ToolExecution::error(format!("Search failed: {e}")),
        }
    }

    async fn write_file(&mut self, input: WriteFileInput) -> ToolExecution {
        let path = normalize_path(&input.path).to_string();

        // Diff base only; a failed lookup leaves it empty.
        let original_content = match self.host.get_file(&path, None).await {
            Ok(file) => file.map(|f| f.content),
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "original content unavailable");
                None
            }
        };

        let write = StagedWrite {
            path,
            content: input.content,
            description: input.description,
        };
        let staged = self.staging.push(write.clone());

        ToolExecution::ok(format!(
            "Staged {} ({staged} file write(s) staged so far). Changes are not committed until they are landed.",
            write.path
        ))
        .with_effect(ToolEffect::Staged {
            write,
            original_content,
        })
    }

    /// Refusal for landing calls that cannot proceed, if any.
    fn landing_refusal(&self) -> Option<ToolExecution> {
        if let Some(landed) = &self.landing {
            return Some(ToolExecution::error(format!(
                "Changes were already landed ({landed}). Do not land again."
            )));
        }
        if self.staging.is_empty() {
            return Some(ToolExecution::error(
                "No files were written. Use write_file to stage changes before landing them.",
            ));
        }
        None
    }

    async fn create_pull_request(
        &mut self,
        input: &CreatePullRequestInput,
    ) -> Result<ToolExecution, LandingError> {
        if let Some(refusal) = self.landing_refusal() {
            return Ok(refusal);
        }

        let writes = self.staging.flatten();
        let result = landing::open_pull_request(
            self.host,
            &writes,
            &PullRequestDraft {
                title: &input.title,
                body: &input.body,
                branch_name: &input.branch_name,
            },
        )
        .await?;

        Ok(self.landed(result))
    }

    async fn commit_and_push(
        &mut self,
        input: &CommitAndPushInput,
    ) -> Result<ToolExecution, LandingError> {
        if let Some(refusal) = self.landing_refusal() {
            return Ok(refusal);
        }

        let writes = self.staging.flatten();
        let result = landing::push_direct(self.host, &writes, &input.commit_message).await?;

        Ok(self.landed(result))
    }

    fn landed(&mut self, result: LandingResult) -> ToolExecution {
        self.landing = Some(result.clone());
        ToolExecution::ok(result.to_string()).with_effect(ToolEffect::Landed(result))
    }
}

/// Repository paths are relative; tolerate a leading `/` or `./`.
fn normalize_path(path: &str) -> &str {
    let path = path.trim();
    let path = path.strip_prefix("./").unwrap_or(path);
    path.trim_start_matches('/').trim_end_matches('/')
}

fn truncate(content: String, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let total = content.chars().count();
            format!(
                "{}\n\n(File truncated: showing {max_chars} of {total} characters.)",
                &content[..cut]
            )
        }
        None => content,
    }
}
