//! Core message types shared by every provider.

use serde::{Deserialize, Serialize};

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,

    /// Message content.
    pub content: Content,
}

impl Message {
    /// Plain-text user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
        }
    }

    /// Tool-use blocks returned by the model get replayed as an assistant turn.
    #[must_use]
    pub const fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Blocks(blocks),
        }
    }

    /// Whether this message carries tool results.
    #[must_use]
    pub fn is_tool_result_turn(&self) -> bool {
        self.role == Role::User
            && matches!(&self.content, Content::Blocks(blocks)
                if !blocks.is_empty()
                    && blocks.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. })))
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content - can be text or structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Simple text content.
    Text(String),

    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Get the text content, joining blocks if necessary.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A content block in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content.
    Text { text: String },

    /// Tool use request from assistant.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool result from user.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    /// Build a tool result block.
    #[must_use]
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: is_error.then_some(true),
        }
    }
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name.
    pub name: String,

    /// Tool description.
    pub description: String,

    /// JSON schema for input parameters.
    pub input_schema: serde_json::Value,
}

/// Why the response stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// The model considers its turn over and will not act on tool output.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::EndTurn | Self::MaxTokens)
    }
}

/// Token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_block_omits_false_error_flag() {
        let block = ContentBlock::tool_result("call_1", "ok", false);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert!(json.get("is_error").is_none());

        let block = ContentBlock::tool_result("call_1", "boom", true);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["is_error"], true);
    }

    #[test]
    fn content_text_joins_text_blocks_only() {
        let content = Content::Blocks(vec![
            ContentBlock::Text {
                text: "Looking at ".to_string(),
            },
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "read_file".to_string(),
                input: serde_json::json!({"path": "a.rs"}),
            },
            ContentBlock::Text {
                text: "the file".to_string(),
            },
        ]);
        assert_eq!(content.text(), "Looking at the file");
    }

    #[test]
    fn final_stop_reasons() {
        assert!(StopReason::EndTurn.is_final());
        assert!(StopReason::MaxTokens.is_final());
        assert!(!StopReason::ToolUse.is_final());
        assert!(!StopReason::StopSequence.is_final());
    }

    #[test]
    fn tool_result_turn_detection() {
        let turn = Message {
            role: Role::User,
            content: Content::Blocks(vec![ContentBlock::tool_result("a", "x", false)]),
        };
        assert!(turn.is_tool_result_turn());
        assert!(!Message::user("hi").is_tool_result_turn());
    }
}
