//! `OpenAI` provider implementation using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, Azure, vLLM, Ollama)
//! via the base URL override in [`ResearchConfig`].

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
    ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestSystemMessageContent,
    ChatCompletionRequestToolMessage, ChatCompletionRequestToolMessageContent,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent, ChatCompletionTool,
    ChatCompletionToolType, CreateChatCompletionRequest, CreateChatCompletionStreamResponse,
    FunctionCall, FunctionObject,
};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use futures_util::StreamExt;
use tracing::warn;

use crate::agent::config::ResearchConfig;
use crate::agent::message::{ChatRequest, ChatResponse, ConversationMessage, Role, TokenUsage};
use crate::agent::provider::{DeltaStream, LlmProvider, StreamDelta, ToolCallDelta};
use crate::agent::tool::ToolCall;
use crate::error::AgentError;

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions. Rate limiting is
/// reported as [`AgentError::RateLimited`] so the adapter can back off.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// Creates a new provider from research configuration.
    #[must_use]
    pub fn new(config: &ResearchConfig) -> Self {
        Self::with_base_url(config, config.base_url.as_deref())
    }

    /// Creates a provider against an explicit API root.
    ///
    /// `None` uses the SDK default (`https://api.openai.com/v1`).
    #[must_use]
    pub fn with_base_url(config: &ResearchConfig, base_url: Option<&str>) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);
        if let Some(base_url) = base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let mut client = Client::with_config(openai_config).with_backoff(no_retry_backoff());
        match reqwest::Client::builder().timeout(config.timeout).build() {
            Ok(http) => client = client.with_http_client(http),
            Err(e) => warn!(error = %e, "failed to build HTTP client, using default"),
        }

        Self { client }
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &ConversationMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: None,
            }),
            Role::Assistant => {
                let tool_calls = if msg.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        msg.tool_calls
                            .iter()
                            .map(|tc| ChatCompletionMessageToolCall {
                                id: tc.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                };

                let content = if msg.content.is_empty() {
                    None
                } else {
                    Some(ChatCompletionRequestAssistantMessageContent::Text(
                        msg.content.clone(),
                    ))
                };

                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content,
                    name: None,
                    tool_calls,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
            Role::Tool => ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                content: ChatCompletionRequestToolMessageContent::Text(msg.content.clone()),
                tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
            }),
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|td| ChatCompletionTool {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionObject {
                            name: td.name.clone(),
                            description: Some(td.description.clone()),
                            parameters: Some(td.parameters.clone()),
                            strict: None,
                        },
                    })
                    .collect(),
            )
        };

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_completion_tokens: request.params.max_tokens,
            presence_penalty: request.params.presence_penalty,
            stream: if request.stream { Some(true) } else { None },
            tools,
            ..Default::default()
        }
    }
}

/// Maps SDK errors onto the agent taxonomy, separating rate limits.
/// Gives up on the first 429 so rate limits surface to the adapter's
/// [`RetryPolicy`](crate::agent::adapter::RetryPolicy).
fn no_retry_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..ExponentialBackoff::default()
    }
}

fn classify_error(err: &OpenAIError) -> AgentError {
    let message = err.to_string();
    match err {
        OpenAIError::Reqwest(e) => {
            let status = e.status().map(|s| s.as_u16());
            if status == Some(429) {
                AgentError::RateLimited { message }
            } else {
                AgentError::ApiRequest { message, status }
            }
        }
        OpenAIError::ApiError(_) | OpenAIError::StreamError(_) if mentions_rate_limit(err) => {
            AgentError::RateLimited { message }
        }
        OpenAIError::StreamError(_) => AgentError::Stream { message },
        _ => AgentError::ApiRequest {
            message,
            status: None,
        },
    }
}

fn mentions_rate_limit(err: &OpenAIError) -> bool {
    let text = format!("{err} {err:?}").to_ascii_lowercase();
    text.contains("rate_limit")
        || text.contains("rate limit")
        || text.contains("429")
        || text.contains("too many requests")
}

fn map_stream_item(
    item: Result<CreateChatCompletionStreamResponse, OpenAIError>,
) -> Result<StreamDelta, AgentError> {
    let response = item.map_err(|e| classify_error(&e))?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Ok(StreamDelta::default());
    };

    let tool_calls = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|chunk| {
            let (name, arguments) = chunk
                .function
                .map_or((None, None), |f| (f.name, f.arguments));
            ToolCallDelta {
                index: chunk.index,
                id: chunk.id,
                name,
                arguments,
            }
        })
        .collect();

    Ok(StreamDelta {
        content: choice.delta.content,
        reasoning: None,
        tool_calls,
    })
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let openai_request = Self::build_request(request);

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| classify_error(&e))?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let tool_calls = choice
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            reasoning: None,
            usage,
            tool_calls,
            finish_reason,
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, AgentError> {
        let mut stream_request = request.clone();
        stream_request.stream = true;
        let openai_request = Self::build_request(&stream_request);

        let stream = self
            .client
            .chat()
            .create_stream(openai_request)
            .await
            .map_err(|e| classify_error(&e))?;

        Ok(Box::pin(stream.map(map_stream_item)))
    }
}
