//! Agent types.
//!
//! Re-exports from agent-core, plus the step and landing types observed by
//! callers of a run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use agent_core::conversation::Conversation;
pub use agent_core::types::{Content, ContentBlock, Message, Role, StopReason, Tool, Usage};

use super::staging::StagedWrite;

/// One unit of observable progress during a run.
///
/// Steps are emitted once, in the order the underlying work completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStep {
    /// Model prose for one turn
    Thinking { text: String },
    /// A tool is about to run
    ToolCall {
        id: String,
        name: String,
        #[schema(value_type = Object)]
        input: serde_json::Value,
    },
    /// A tool finished
    ToolResult {
        id: String,
        name: String,
        summary: String,
        is_error: bool,
    },
    /// A write was staged
    FileWrite {
        path: String,
        content: String,
        description: String,
        /// Content before the write, when the file existed
        #[serde(skip_serializing_if = "Option::is_none")]
        original_content: Option<String>,
    },
    /// Changes landed as a pull request
    PrCreated {
        url: String,
        number: u64,
        branch: String,
    },
    /// Changes landed on the default branch
    PushCreated { commit_sha: String, files: usize },
    /// Human-readable failure
    Error { message: String },
    /// The model finished
    Done,
    /// Final step of a run, after any fallback landing
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        landing: Option<LandingResult>,
        files: Vec<String>,
        message: String,
    },
}

impl AgentStep {
    /// Snake-case tag of this step.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::FileWrite { .. } => "file_write",
            Self::PrCreated { .. } => "pr_created",
            Self::PushCreated { .. } => "push_created",
            Self::Error { .. } => "error",
            Self::Done => "done",
            Self::Complete { .. } => "complete",
        }
    }

    /// Step announcing a landing outcome.
    #[must_use]
    pub fn landed(result: &LandingResult) -> Self {
        match result {
            LandingResult::PullRequest {
                url,
                number,
                branch,
            } => Self::PrCreated {
                url: url.clone(),
                number: *number,
                branch: branch.clone(),
            },
            LandingResult::DirectPush { commit_sha, files } => Self::PushCreated {
                commit_sha: commit_sha.clone(),
                files: *files,
            },
        }
    }
}

/// How staged changes became durable in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LandingResult {
    PullRequest {
        url: String,
        number: u64,
        branch: String,
    },
    DirectPush {
        commit_sha: String,
        files: usize,
    },
}

impl fmt::Display for LandingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullRequest { url, number, .. } => write!(f, "Pull request #{number}: {url}"),
            Self::DirectPush { commit_sha, files } => {
                let short = commit_sha.get(..7).unwrap_or(commit_sha);
                write!(f, "Pushed {files} file(s) to the default branch ({short})")
            }
        }
    }
}

/// Which landing tool the model is offered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LandingMode {
    /// New branch plus pull request
    #[default]
    PullRequest,
    /// Commit straight to the default branch
    DirectPush,
}

impl LandingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PullRequest => "pull_request",
            Self::DirectPush => "direct_push",
        }
    }
}

impl fmt::Display for LandingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LandingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pr" | "pull_request" | "pull-request" => Ok(Self::PullRequest),
            "push" | "direct_push" | "direct-push" => Ok(Self::DirectPush),
            other => Err(format!("unknown landing mode '{other}' (expected pr or push)")),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model stopped requesting tools
    Finished,
    /// The model call failed
    ApiError,
    /// The iteration bound was reached
    IterationLimit,
    /// A landing tool call failed
    LandingFailed,
}

/// Everything a run leaves behind for its caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Staged writes in arrival order, landed or not
    pub staged: Vec<StagedWrite>,
    /// Set only by a successful landing tool call
    pub landing: Option<LandingResult>,
    /// Model calls that requested tools
    pub iterations: usize,
    pub termination: TerminationReason,
    /// Prose of the model's final turn
    pub final_text: String,
    /// The full log, for replay
    pub conversation: Conversation,
}

impl RunOutcome {
    /// Staged writes exist but nothing landed them.
    #[must_use]
    pub fn needs_fallback(&self) -> bool {
        !self.staged.is_empty() && self.landing.is_none()
    }
}
