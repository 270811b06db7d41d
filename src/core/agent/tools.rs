//! Tool definitions and input validation.
//!
//! The catalog is what the model sees; [`ToolInput`] is what the adapter
//! dispatches on. Both are keyed by [`ToolName`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{LandingMode, Tool};

/// Bumped whenever a tool's name, description or schema changes.
pub const CATALOG_VERSION: u32 = 1;

/// Every tool the model can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    ListDirectory,
    SearchCode,
    WriteFile,
    CreatePullRequest,
    CommitAndPush,
}

impl ToolName {
    pub const ALL: [Self; 6] = [
        Self::ReadFile,
        Self::ListDirectory,
        Self::SearchCode,
        Self::WriteFile,
        Self::CreatePullRequest,
        Self::CommitAndPush,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::ListDirectory => "list_directory",
            Self::SearchCode => "search_code",
            Self::WriteFile => "write_file",
            Self::CreatePullRequest => "create_pull_request",
            Self::CommitAndPush => "commit_and_push",
        }
    }

    /// Look up a tool by its wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Whether calling this tool lands the staged writes.
    #[must_use]
    pub const fn is_landing(self) -> bool {
        matches!(self, Self::CreatePullRequest | Self::CommitAndPush)
    }

    /// Whether the tool is offered in the given landing mode.
    #[must_use]
    pub const fn available_in(self, mode: LandingMode) -> bool {
        match self {
            Self::CreatePullRequest => matches!(mode, LandingMode::PullRequest),
            Self::CommitAndPush => matches!(mode, LandingMode::DirectPush),
            _ => true,
        }
    }

    fn definition(self) -> Tool {
        let (description, input_schema) = match self {
            Self::ReadFile => (
                "Read the full contents of a file in the repository.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path relative to the repository root, e.g. src/main.rs"
                        }
                    },
                    "required": ["path"]
                }),
            ),
            Self::ListDirectory => (
                "List the files and subdirectories at a path in the repository. Directories end with '/'.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Directory path relative to the repository root (empty for the root)"
                        }
                    }
                }),
            ),
            Self::SearchCode => (
                "Search the repository's code for text. Returns the paths of matching files.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Text to search for"
                        },
                        "file_extension": {
                            "type": "string",
                            "description": "Only search files with this extension, e.g. ts"
                        }
                    },
                    "required": ["query"]
                }),
            ),
            Self::WriteFile => (
                "Stage a complete new version of a file. Nothing is committed until the changes are landed. Always send the entire file content, not a fragment.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Path relative to the repository root"
                        },
                        "content": {
                            "type": "string",
                            "description": "The complete new file content"
                        },
                        "description": {
                            "type": "string",
                            "description": "Short description of the change"
                        }
                    },
                    "required": ["path", "content", "description"]
                }),
            ),
            Self::CreatePullRequest => (
                "Create a branch with every staged file and open a pull request against the default branch. Call this once, after all files are written.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "title": {
                            "type": "string",
                            "description": "Pull request title"
                        },
                        "body": {
                            "type": "string",
                            "description": "Pull request description"
                        },
                        "branch_name": {
                            "type": "string",
                            "description": "New branch name, e.g. feature/health-check"
                        }
                    },
                    "required": ["title", "body", "branch_name"]
                }),
            ),
            Self::CommitAndPush => (
                "Commit every staged file directly to the default branch. Call this once, after all files are written.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "commit_message": {
                            "type": "string",
                            "description": "Commit message"
                        }
                    },
                    "required": ["commit_message"]
                }),
            ),
        };

        Tool {
            name: self.as_str().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool definitions offered to the model for a run in `mode`.
///
/// Four inspection/staging tools plus exactly one landing tool.
#[must_use]
pub fn catalog(mode: LandingMode) -> Vec<Tool> {
    ToolName::ALL
        .into_iter()
        .filter(|t| t.available_in(mode))
        .map(ToolName::definition)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadFileInput {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListDirectoryInput {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchCodeInput {
    pub query: String,
    #[serde(default)]
    pub file_extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteFileInput {
    pub path: String,
    pub content: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatePullRequestInput {
    pub title: String,
    pub body: String,
    pub branch_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitAndPushInput {
    pub commit_message: String,
}

/// Validated input of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", content = "input", rename_all = "snake_case")]
pub enum ToolInput {
    ReadFile(ReadFileInput),
    ListDirectory(ListDirectoryInput),
    SearchCode(SearchCodeInput),
    WriteFile(WriteFileInput),
    CreatePullRequest(CreatePullRequestInput),
    CommitAndPush(CommitAndPushInput),
}

/// Why a tool call could not be turned into a [`ToolInput`].
#[derive(Debug, thiserror::Error)]
pub enum ToolInputError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} is not available when landing by {mode}")]
    NotAvailable { tool: ToolName, mode: LandingMode },

    #[error("Invalid input for {tool}: {source}")]
    Malformed {
        tool: ToolName,
        #[source]
        source: serde_json::Error,
    },
}

impl ToolInput {
    /// Validate a raw tool call from the model.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tools, landing tools outside `mode`, and
    /// inputs that do not match the tool's schema.
    pub fn parse(
        name: &str,
        input: &serde_json::Value,
        mode: LandingMode,
    ) -> Result<Self, ToolInputError> {
        let tool = ToolName::parse(name).ok_or_else(|| ToolInputError::UnknownTool(name.into()))?;
        if !tool.available_in(mode) {
            return Err(ToolInputError::NotAvailable { tool, mode });
        }

        // Models often send nothing at all for an argument-free listing.
        let input = match input {
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };

        serde_json::from_value(serde_json::json!({ "name": name, "input": input }))
            .map_err(|source| ToolInputError::Malformed { tool, source })
    }

    #[must_use]
    pub const fn name(&self) -> ToolName {
        match self {
            Self::ReadFile(_) => ToolName::ReadFile,
            Self::ListDirectory(_) => ToolName::ListDirectory,
            Self::SearchCode(_) => ToolName::SearchCode,
            Self::WriteFile(_) => ToolName::WriteFile,
            Self::CreatePullRequest(_) => ToolName::CreatePullRequest,
            Self::CommitAndPush(_) => ToolName::CommitAndPush,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_offers_one_landing_tool_per_mode() {
        let names = |mode| -> Vec<String> { catalog(mode).into_iter().map(|t| t.name).collect() };

        assert_eq!(
            names(LandingMode::PullRequest),
            [
                "read_file",
                "list_directory",
                "search_code",
                "write_file",
                "create_pull_request"
            ]
        );
        assert_eq!(
            names(LandingMode::DirectPush).last().map(String::as_str),
            Some("commit_and_push")
        );
    }

    #[test]
    fn catalog_schemas_list_required_fields() {
        for tool in catalog(LandingMode::PullRequest) {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            let required = tool.input_schema["required"].as_array();
            if tool.name == "list_directory" {
                assert!(required.is_none());
            } else {
                let required = required.unwrap();
                for field in required {
                    let field = field.as_str().unwrap();
                    assert!(
                        tool.input_schema["properties"].get(field).is_some(),
                        "{} requires undeclared {field}",
                        tool.name
                    );
                }
            }
        }
    }

    #[test]
    fn names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::parse("shell"), None);
    }

    #[test]
    fn parses_valid_input() {
        let input = ToolInput::parse(
            "search_code",
            &serde_json::json!({"query": "health", "file_extension": "ts"}),
            LandingMode::PullRequest,
        )
        .unwrap();

        assert_eq!(
            input,
            ToolInput::SearchCode(SearchCodeInput {
                query: "health".to_string(),
                file_extension: Some("ts".to_string()),
            })
        );
        assert_eq!(input.name(), ToolName::SearchCode);
    }

    #[test]
    fn null_listing_input_means_root() {
        let input =
            ToolInput::parse("list_directory", &serde_json::Value::Null, LandingMode::DirectPush)
                .unwrap();
        assert_eq!(
            input,
            ToolInput::ListDirectory(ListDirectoryInput::default())
        );
    }

    #[test]
    fn rejects_unknown_unavailable_and_malformed_calls() {
        let err = ToolInput::parse("shell", &serde_json::json!({}), LandingMode::PullRequest)
            .unwrap_err();
        assert!(matches!(err, ToolInputError::UnknownTool(_)));

        let err = ToolInput::parse(
            "commit_and_push",
            &serde_json::json!({"commit_message": "x"}),
            LandingMode::PullRequest,
        )
        .unwrap_err();
        assert!(matches!(err, ToolInputError::NotAvailable { .. }));

        let err = ToolInput::parse(
            "write_file",
            &serde_json::json!({"path": "a.rs"}),
            LandingMode::PullRequest,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Invalid input for write_file"));
    }
}
