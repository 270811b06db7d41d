//! Task runs: the agent loop plus everything its caller owes it.
//!
//! After the loop returns, staged work that never landed is pushed to the
//! default branch, a summary is recorded and a final `complete` step closes
//! the stream.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::agent::prompt::{ContextFile, system_prompt};
use super::agent::{
    Agent, AgentStep, Conversation, LandingMode, LandingResult, RunOutcome, StagingBuffer,
    StepEmitter,
};
use super::history::{RunRecorder, RunSummary};
use super::repo::{HostConnector, RepoHost, RepositoryDirectory, landing};

const MAX_TITLE_CHARS: usize = 72;

/// A unit of work for the agent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    /// Configured repository key or `owner/repo`
    pub repository: String,
    /// Instruction sent as the first user message
    pub prompt: String,
    /// Defaults to the first line of the prompt
    #[serde(default)]
    pub title: Option<String>,
    /// Extra background for the system prompt
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
    /// Overrides the configured landing mode
    #[serde(default)]
    pub mode: Option<LandingMode>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Push unlanded staged work to the default branch after the run
    #[serde(default = "default_auto_land")]
    pub auto_land: bool,
}

const fn default_auto_land() -> bool {
    true
}

impl Task {
    #[must_use]
    pub fn new(repository: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            prompt: prompt.into(),
            title: None,
            description: None,
            context_files: Vec::new(),
            mode: None,
            max_iterations: None,
            auto_land: true,
        }
    }

    #[must_use]
    pub fn title(&self) -> String {
        let source = self
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.prompt);
        let line = source.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
        line.trim().chars().take(MAX_TITLE_CHARS).collect()
    }

    /// Commit message for fallback landings.
    #[must_use]
    pub fn commit_message(&self) -> String {
        let title = self.title();
        if title.is_empty() {
            "Apply changes from repo-pilot".to_string()
        } else {
            title
        }
    }
}

/// Resolve a repository key and open a host for it.
///
/// Returns the repository's `owner/repo` name with the host.
///
/// # Errors
///
/// Returns an error if the key is unknown, has no credential, or the client
/// cannot be built.
pub fn open_repository(
    directory: &dyn RepositoryDirectory,
    connector: &dyn HostConnector,
    key: &str,
) -> super::Result<(String, Arc<dyn RepoHost>)> {
    let coordinates = directory.resolve(key)?;
    let host = connector.connect(&coordinates)?;
    Ok((coordinates.full_name(), host))
}

/// Land staged writes that the run left behind.
///
/// Does nothing unless writes were staged and nothing landed. Emits the
/// landing step or an error step.
pub async fn auto_land(
    host: &dyn RepoHost,
    outcome: &RunOutcome,
    commit_message: &str,
    emitter: &mut StepEmitter<'_>,
) -> Option<LandingResult> {
    if !outcome.needs_fallback() {
        return None;
    }

    let writes = StagingBuffer::from(outcome.staged.clone()).flatten();
    tracing::info!(files = writes.len(), "auto-landing unlanded writes");

    match landing::push_direct(host, &writes, commit_message).await {
        Ok(result) => {
            emitter.emit(AgentStep::landed(&result));
            Some(result)
        }
        Err(e) => {
            tracing::warn!(error = %e, "auto-land failed");
            emitter.emit(AgentStep::Error {
                message: format!("Auto-land failed: {e}"),
            });
            None
        }
    }
}

/// What [`TaskRunner::run`] hands back.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    /// The model conversation, for transcripts
    pub conversation: Conversation,
}

/// Runs tasks with a configured agent.
#[derive(Clone)]
pub struct TaskRunner {
    agent: Agent,
    recorder: Option<Arc<dyn RunRecorder>>,
}

impl TaskRunner {
    #[must_use]
    pub const fn new(agent: Agent) -> Self {
        Self {
            agent,
            recorder: None,
        }
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub const fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Run a task against `host` and close the step stream with `complete`.
    pub async fn run(
        &self,
        host: &dyn RepoHost,
        repository: &str,
        task: &Task,
        emitter: &mut StepEmitter<'_>,
    ) -> RunReport {
        let started_at = chrono::Utc::now().timestamp_millis();
        let id = uuid::Uuid::new_v4().to_string();
        let title = task.title();

        let mut agent = self.agent.clone();
        if let Some(mode) = task.mode {
            agent = agent.with_mode(mode);
        }
        if let Some(max) = task.max_iterations {
            agent = agent.with_max_iterations(max);
        }

        tracing::info!(run = %id, repo = %repository, title = %title, "run started");

        let system = system_prompt(
            repository,
            &title,
            task.description.as_deref().unwrap_or_default(),
            &task.context_files,
            agent.mode(),
        );
        let outcome = agent.run(host, &system, &task.prompt, emitter).await;

        let fallback = if task.auto_land {
            auto_land(host, &outcome, &task.commit_message(), emitter).await
        } else {
            None
        };
        let fallback_used = fallback.is_some();
        let landing = outcome.landing.clone().or(fallback);

        let files = StagingBuffer::from(outcome.staged.clone()).paths();
        let message = summary_message(&outcome, landing.as_ref(), fallback_used);

        let summary = RunSummary {
            id,
            repository: repository.to_string(),
            title,
            landing: landing.clone(),
            files: files.clone(),
            message: message.clone(),
            iterations: outcome.iterations,
            termination: outcome.termination,
            fallback_used,
            started_at,
            finished_at: chrono::Utc::now().timestamp_millis(),
        };

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(&summary) {
                tracing::warn!(run = %summary.id, error = %e, "failed to record run summary");
            }
        }

        emitter.emit(AgentStep::Complete {
            landing,
            files,
            message,
        });

        RunReport {
            summary,
            conversation: outcome.conversation,
        }
    }
}

fn summary_message(
    outcome: &RunOutcome,
    landing: Option<&LandingResult>,
    fallback_used: bool,
) -> String {
    let outcome_line = match landing {
        Some(result) if fallback_used => format!("{result} (landed automatically)"),
        Some(result) => result.to_string(),
        None if outcome.staged.is_empty() => "No files were changed.".to_string(),
        None => "Staged changes were not landed.".to_string(),
    };

    let text = outcome.final_text.trim();
    if text.is_empty() {
        outcome_line
    } else {
        format!("{text}\n\n{outcome_line}")
    }
}
