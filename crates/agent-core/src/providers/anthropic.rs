//! Anthropic Messages API provider.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::provider::{CompletionEvent, CompletionRequest, CompletionStream, LlmProvider};
use crate::sse::SseBuffer;
use crate::types::{ContentBlock, Message, StopReason, Tool, Usage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic (Claude) LLM provider.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, None)
    }

    /// Create a provider pointed at a proxy or gateway.
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty.
    pub fn with_base_url(api_key: impl Into<String>, base_url: Option<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AgentError::ApiKeyMissing);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| AgentError::ApiKeyMissing)?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }
}

// Wire types for the Messages API.

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: WireUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<StopReason>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Turns Anthropic stream events into provider-neutral completion events.
#[derive(Debug, Default)]
struct EventTranslator {
    blocks: Vec<Option<ContentBlock>>,
    input_tokens: u32,
}

impl EventTranslator {
    fn translate(&mut self, event: StreamEvent) -> Option<CompletionEvent> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
                None
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if self.blocks.len() <= index {
                    self.blocks.resize(index + 1, None);
                }
                let start = match &content_block {
                    ContentBlock::ToolUse { id, name, .. } => Some(CompletionEvent::ToolUseStart {
                        index,
                        id: id.clone(),
                        name: name.clone(),
                    }),
                    _ => None,
                };
                self.blocks[index] = Some(content_block);
                start
            }
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => Some(CompletionEvent::TextDelta(text)),
                Delta::InputJsonDelta { partial_json } => Some(CompletionEvent::ToolInputDelta {
                    index,
                    partial_json,
                }),
            },
            StreamEvent::ContentBlockStop { index } => self
                .blocks
                .get_mut(index)
                .and_then(Option::take)
                .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
                .map(|block| CompletionEvent::ContentBlockDone { index, block }),
            StreamEvent::MessageDelta { delta, usage } => Some(CompletionEvent::Done {
                stop_reason: delta.stop_reason,
                usage: Some(Usage {
                    input_tokens: self.input_tokens.max(usage.input_tokens),
                    output_tokens: usage.output_tokens,
                }),
            }),
            StreamEvent::Error { error } => Some(CompletionEvent::Error(error.message)),
            StreamEvent::MessageStop | StreamEvent::Ping => None,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            messages: &request.messages,
            system: request.system.as_deref(),
            tools: request.tools.as_deref(),
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .headers(self.headers()?)
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
            let mut translator = EventTranslator::default();

            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                sse.push(&chunk);

                while let Some(data) = sse.next_event() {
                    let Some(data) = data else {
                        continue;
                    };

                    match serde_json::from_str::<StreamEvent>(&data) {
                        Ok(event) => {
                            if let Some(event) = translator.translate(event) {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(data = %data, error = %e, "skipping unrecognized event");
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
