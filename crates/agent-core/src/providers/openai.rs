//! `OpenAI`-compatible Chat Completions provider.
//!
//! Works with `OpenAI` itself and with gateways that speak the same protocol
//! (`OpenRouter`, Together, local Ollama).

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::provider::{CompletionEvent, CompletionRequest, CompletionStream, LlmProvider};
use crate::sse::SseBuffer;
use crate::types::{Content, ContentBlock, Message, Role, StopReason, Tool, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// LLM provider for the `OpenAI` API and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a new provider instance.
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AgentError::ApiKeyMissing);
        }

        Self::with_config(Some(api_key), None)
    }

    /// Create a provider with optional API key and base URL.
    ///
    /// Local gateways such as Ollama accept requests without a key.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn with_config(api_key: Option<String>, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

// Request wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<FunctionTool>>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    const fn text(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ToolCallRequest {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: FunctionCall,
}

#[derive(Debug, Serialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: FunctionSpec,
}

#[derive(Debug, Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Streaming response wire types

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Convert our messages to chat-completions messages.
///
/// Tool results become one `tool` message each, as the protocol requires.
fn convert_messages(messages: &[Message], system: Option<&str>) -> Vec<ChatMessage> {
    let mut result = Vec::new();

    if let Some(sys) = system {
        result.push(ChatMessage::text("system", sys.to_string()));
    }

    for msg in messages {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        let blocks = match &msg.content {
            Content::Text(text) => {
                result.push(ChatMessage::text(role, text.clone()));
                continue;
            }
            Content::Blocks(blocks) => blocks,
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in blocks {
            match block {
                ContentBlock::Text { text: t } => text.push_str(t),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCallRequest {
                    id: id.clone(),
                    call_type: "function",
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => result.push(ChatMessage {
                    role: "tool",
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                }),
            }
        }

        if !tool_calls.is_empty() {
            result.push(ChatMessage {
                role: "assistant",
                content: (!text.is_empty()).then_some(text),
                tool_calls: Some(tool_calls),
                tool_call_id: None,
            });
        } else if !text.is_empty() {
            result.push(ChatMessage::text(role, text));
        }
    }

    result
}

/// Convert our tools to the function calling format.
fn convert_tools(tools: &[Tool]) -> Vec<FunctionTool> {
    tools
        .iter()
        .map(|t| FunctionTool {
            tool_type: "function",
            function: FunctionSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Convert finish reason to our stop reason.
fn convert_stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "stop" => Some(StopReason::EndTurn),
        "tool_calls" | "function_call" => Some(StopReason::ToolUse),
        "length" => Some(StopReason::MaxTokens),
        _ => None,
    }
}

/// A tool call assembled from fragments: id, name, arguments.
#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds chunk deltas into completion events.
///
/// Tool calls are announced once their name arrives and completed when the
/// choice reports a finish reason. Block index 0 is reserved for text.
#[derive(Debug, Default)]
struct ChunkTranslator {
    calls: BTreeMap<usize, PendingCall>,
    stop_reason: Option<StopReason>,
    finished: bool,
}

impl ChunkTranslator {
    fn translate(&mut self, chunk: ChatChunk) -> Vec<CompletionEvent> {
        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(CompletionEvent::TextDelta(text));
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let index = call.index + 1;
                let pending = self.calls.entry(index).or_default();
                if let Some(id) = call.id {
                    pending.id = id;
                }
                let Some(function) = call.function else {
                    continue;
                };
                if let Some(name) = function.name {
                    pending.name.clone_from(&name);
                    events.push(CompletionEvent::ToolUseStart {
                        index,
                        id: pending.id.clone(),
                        name,
                    });
                }
                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    pending.arguments.push_str(&arguments);
                    events.push(CompletionEvent::ToolInputDelta {
                        index,
                        partial_json: arguments,
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.stop_reason = convert_stop_reason(&reason);
                self.finished = true;
                for (index, call) in std::mem::take(&mut self.calls) {
                    let input = serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::json!({}));
                    events.push(CompletionEvent::ContentBlockDone {
                        index,
                        block: ContentBlock::ToolUse {
                            id: call.id,
                            name: call.name,
                            input,
                        },
                    });
                }
            }
        }

        // Usage arrives in a trailing chunk with no choices.
        if let Some(usage) = chunk.usage {
            events.push(CompletionEvent::Done {
                stop_reason: self.stop_reason,
                usage: Some(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                }),
            });
            self.finished = false;
        }

        events
    }

    /// Flush a `Done` when the gateway never sent a usage chunk.
    fn finish(&mut self) -> Option<CompletionEvent> {
        std::mem::take(&mut self.finished).then_some(CompletionEvent::Done {
            stop_reason: self.stop_reason,
            usage: None,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|_| AgentError::ApiKeyMissing)?,
            );
        }

        let body = ChatRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            messages: convert_messages(&request.messages, request.system.as_deref()),
            tools: request.tools.as_deref().map(convert_tools),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut sse = SseBuffer::new();
            let mut translator = ChunkTranslator::default();

            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                sse.push(&chunk);

                while let Some(data) = sse.next_event() {
                    let Some(data) = data.filter(|d| d.trim() != "[DONE]") else {
                        continue;
                    };

                    match serde_json::from_str::<ChatChunk>(&data) {
                        Ok(chunk) => {
                            for event in translator.translate(chunk) {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(data = %data, error = %e, "skipping unrecognized chunk");
                        }
                    }
                }
            }

            if let Some(done) = translator.finish() {
                yield Ok(done);
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(json: &str) -> ChatChunk {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn provider_requires_api_key() {
        assert!(OpenAiProvider::new("").is_err());
    }

    #[test]
    fn with_config_allows_keyless_gateways() {
        let provider =
            OpenAiProvider::with_config(None, Some("http://localhost:11434/v1/".to_string()))
                .unwrap();
        assert!(provider.api_key.is_none());
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn convert_messages_splits_tool_results() {
        let messages = vec![
            Message::user("Fix it"),
            Message::assistant_blocks(vec![
                ContentBlock::Text {
                    text: "Reading".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "read_file".to_string(),
                    input: serde_json::json!({"path": "a.rs"}),
                },
            ]),
            Message {
                role: Role::User,
                content: Content::Blocks(vec![
                    ContentBlock::tool_result("call_1", "fn a() {}", false),
                    ContentBlock::tool_result("call_2", "Error: nope", true),
                ]),
            },
        ];

        let converted = convert_messages(&messages, Some("sys"));
        let roles: Vec<_> = converted.iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool", "tool"]);
        assert_eq!(converted[2].content.as_deref(), Some("Reading"));
        assert_eq!(converted[4].tool_call_id.as_deref(), Some("call_2"));
    }

    #[test]
    fn translator_assembles_fragmented_tool_calls() {
        let mut translator = ChunkTranslator::default();
        let mut events = Vec::new();
        events.extend(translator.translate(chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"write_file","arguments":""}}]},"finish_reason":null}]}"#,
        )));
        events.extend(translator.translate(chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":\"a.rs\","}}]},"finish_reason":null}]}"#,
        )));
        events.extend(translator.translate(chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"content\":\"x\",\"description\":\"d\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        )));
        events.extend(translator.translate(chunk(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":8}}"#,
        )));
        assert!(translator.finish().is_none());

        assert!(matches!(&events[0], CompletionEvent::ToolUseStart { index: 1, id, .. } if id == "call_1"));
        let done = events
            .iter()
            .find_map(|e| match e {
                CompletionEvent::ContentBlockDone { block, .. } => Some(block.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            done,
            ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "write_file".to_string(),
                input: serde_json::json!({"path": "a.rs", "content": "x", "description": "d"}),
            }
        );
        assert!(matches!(
            events.last(),
            Some(CompletionEvent::Done {
                stop_reason: Some(StopReason::ToolUse),
                usage: Some(_)
            })
        ));
    }

    #[test]
    fn translator_flushes_done_without_usage() {
        let mut translator = ChunkTranslator::default();
        let events = translator.translate(chunk(
            r#"{"choices":[{"delta":{"content":"Done."},"finish_reason":"stop"}]}"#,
        ));
        assert!(matches!(&events[0], CompletionEvent::TextDelta(t) if t == "Done."));
        assert!(matches!(
            translator.finish(),
            Some(CompletionEvent::Done {
                stop_reason: Some(StopReason::EndTurn),
                usage: None
            })
        ));
    }

    #[test]
    fn convert_stop_reason_maps_correctly() {
        assert_eq!(convert_stop_reason("stop"), Some(StopReason::EndTurn));
        assert_eq!(convert_stop_reason("tool_calls"), Some(StopReason::ToolUse));
        assert_eq!(convert_stop_reason("length"), Some(StopReason::MaxTokens));
        assert_eq!(convert_stop_reason("unknown"), None);
    }
}
