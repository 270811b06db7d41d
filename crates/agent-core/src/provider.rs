//! LLM provider abstraction.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use super::error::{AgentError, Result};
use super::types::{ContentBlock, Message, StopReason, Tool, Usage};

/// Configuration for an LLM request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// System prompt.
    pub system: Option<String>,
    /// Available tools.
    pub tools: Option<Vec<Tool>>,
}

/// A streaming event from the LLM.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    /// A chunk of text content.
    TextDelta(String),
    /// Start of a tool use block.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },
    /// Partial JSON input for a tool.
    ToolInputDelta { index: usize, partial_json: String },
    /// A content block has completed.
    ContentBlockDone { index: usize, block: ContentBlock },
    /// The completion has finished.
    Done {
        stop_reason: Option<StopReason>,
        usage: Option<Usage>,
    },
    /// An error occurred.
    Error(String),
}

/// Stream of completion events.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent>> + Send>>;

/// Trait for LLM providers.
///
/// Implement this trait to add support for a new LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &'static str;

    /// Stream a completion request.
    ///
    /// Returns a stream of completion events.
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream>;
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One fully assembled model turn.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Content blocks in the order the model produced them.
    pub blocks: Vec<ContentBlock>,
    /// Why the model stopped, when the provider reported it.
    pub stop_reason: Option<StopReason>,
    /// Token usage, when the provider reported it.
    pub usage: Option<Usage>,
}

impl Completion {
    /// Prose the model produced alongside (or instead of) tool calls.
    #[must_use]
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool calls in the order the model issued them.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// The model is done: it either said so or asked for nothing.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.stop_reason.is_some_and(StopReason::is_final) || self.tool_uses().is_empty()
    }
}

/// Drain a completion stream into a single assembled turn.
///
/// Text deltas are invoked on `on_text` as they arrive.
///
/// # Errors
///
/// Returns an error if the stream yields one, reports a provider error event,
/// or ends without producing anything.
pub async fn collect_completion<F>(mut stream: CompletionStream, mut on_text: F) -> Result<Completion>
where
    F: FnMut(&str),
{
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut tool_inputs: HashMap<usize, String> = HashMap::new();
    let mut stop_reason = None;
    let mut usage = None;
    let mut finished = false;

    while let Some(event) = stream.next().await {
        match event? {
            CompletionEvent::TextDelta(text) => {
                on_text(&text);
                if let Some(ContentBlock::Text { text: t }) = blocks.last_mut() {
                    t.push_str(&text);
                } else {
                    blocks.push(ContentBlock::Text { text });
                }
            }
            CompletionEvent::ToolUseStart { index, id, name } => {
                ensure_slot(&mut blocks, index);
                blocks[index] = ContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::Value::Null,
                };
            }
            CompletionEvent::ToolInputDelta {
                index,
                partial_json,
            } => {
                tool_inputs.entry(index).or_default().push_str(&partial_json);
            }
            CompletionEvent::ContentBlockDone { index, block } => {
                let ContentBlock::ToolUse {
                    id: done_id,
                    name: done_name,
                    input: done_input,
                } = block
                else {
                    continue;
                };

                let streamed = tool_inputs
                    .remove(&index)
                    .filter(|json| !json.trim().is_empty())
                    .map(|json| {
                        serde_json::from_str(&json).unwrap_or_else(|e| {
                            tracing::debug!(error = %e, "tool input was not valid JSON");
                            serde_json::Value::Null
                        })
                    });

                ensure_slot(&mut blocks, index);
                match &mut blocks[index] {
                    ContentBlock::ToolUse { input, .. } => {
                        if let Some(value) = streamed.filter(|v| !v.is_null()) {
                            *input = value;
                        } else if input.is_null() {
                            *input = done_input;
                        }
                    }
                    slot => {
                        *slot = ContentBlock::ToolUse {
                            id: done_id,
                            name: done_name,
                            input: streamed.filter(|v| !v.is_null()).unwrap_or(done_input),
                        };
                    }
                }
            }
            CompletionEvent::Done {
                stop_reason: reason,
                usage: reported,
            } => {
                stop_reason = reason;
                usage = reported.or(usage);
                finished = true;
            }
            CompletionEvent::Error(message) => {
                return Err(AgentError::Api { status: 0, message });
            }
        }
    }

    blocks.retain(|b| !matches!(b, ContentBlock::Text { text } if text.is_empty()));

    if !finished && blocks.is_empty() {
        return Err(AgentError::StreamEnded);
    }

    Ok(Completion {
        blocks,
        stop_reason,
        usage,
    })
}

fn ensure_slot(blocks: &mut Vec<ContentBlock>, index: usize) {
    while blocks.len() <= index {
        blocks.push(ContentBlock::Text {
            text: String::new(),
        });
    }
}
