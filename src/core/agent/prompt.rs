//! System prompt for a coding run.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::types::LandingMode;

/// Context files larger than this are cut short in the prompt.
const MAX_CONTEXT_CHARS: usize = 20_000;

/// A file handed to the model up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

/// Build the system prompt for a task.
#[must_use]
pub fn system_prompt(
    repository: &str,
    title: &str,
    description: &str,
    context: &[ContextFile],
    mode: LandingMode,
) -> String {
    let mut prompt = format!(
        "You are an autonomous software engineer working on the GitHub repository {repository}. \
         You cannot run code. You can inspect the repository, stage complete file contents, \
         and land your changes.\n\n## Task\n\n{title}\n"
    );

    if !description.trim().is_empty() {
        let _ = write!(prompt, "\n{}\n", description.trim());
    }

    if !context.is_empty() {
        prompt.push_str("\n## Relevant files\n");
        for file in context {
            let content: String = file.content.chars().take(MAX_CONTEXT_CHARS).collect();
            let _ = write!(prompt, "\n### {}\n\n```\n{content}\n```\n", file.path);
        }
    }

    prompt.push_str(
        "\n## How to work\n\n\
         1. Explore with list_directory, search_code and read_file before editing.\n\
         2. Read a file before rewriting it. write_file replaces the whole file, so always send \
         the complete content.\n\
         3. Keep changes focused on the task.\n",
    );

    let landing = match mode {
        LandingMode::PullRequest => {
            "4. When every file is written, call create_pull_request once with a clear title, a \
             body explaining the change, and a descriptive branch name such as feature/short-name.\n"
        }
        LandingMode::DirectPush => {
            "4. When every file is written, call commit_and_push once with a concise commit \
             message.\n"
        }
    };
    prompt.push_str(landing);
    prompt.push_str("5. After landing, reply with a short summary of what you changed.\n");

    prompt
}
