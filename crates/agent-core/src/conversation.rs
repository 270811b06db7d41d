//! Append-only conversation log.
//!
//! Every append returns a new [`Conversation`]; earlier values stay valid, so
//! a caller can keep the log from any iteration around for replay.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Content, ContentBlock, Message, Role};

/// Ordered, role-tagged messages resent in full on every model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    system: Option<String>,
}

impl Conversation {
    /// Create an empty conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation with a system prompt.
    #[must_use]
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            system: Some(system.into()),
        }
    }

    /// Get the system prompt.
    #[must_use]
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Get all messages.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the conversation has any messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Log with a plain user message appended.
    #[must_use]
    pub fn with_user_text(&self, text: impl Into<String>) -> Self {
        self.appended(Message::user(text))
    }

    /// Log with the model's turn (prose and tool requests) appended.
    #[must_use]
    pub fn with_assistant_turn(&self, blocks: Vec<ContentBlock>) -> Self {
        self.appended(Message::assistant_blocks(blocks))
    }

    /// Log with one user turn bundling every tool result of an iteration.
    ///
    /// An empty result set leaves the log unchanged.
    #[must_use]
    pub fn with_tool_results(&self, results: Vec<ContentBlock>) -> Self {
        if results.is_empty() {
            return self.clone();
        }

        self.appended(Message {
            role: Role::User,
            content: Content::Blocks(results),
        })
    }

    fn appended(&self, message: Message) -> Self {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend_from_slice(&self.messages);
        messages.push(message);

        Self {
            messages,
            system: self.system.clone(),
        }
    }

    /// Save conversation to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load conversation from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let conversation: Self = serde_json::from_str(&contents)?;
        Ok(conversation)
    }
}
