//! Provider-agnostic message types for LLM communication.
//!
//! These types decouple the research loop from any specific LLM SDK.
//! A [`ConversationMessage`] is never mutated once it enters a session log;
//! corrections are appended as new messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tool::{ToolCall, ToolDefinition};

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// Tool result.
    Tool,
}

impl Role {
    /// Maps a free-form role string onto a [`Role`].
    ///
    /// Accepts the spellings used by common chat APIs (`human`, `ai`,
    /// `agent`, `function`, ...). Anything unrecognized is treated as
    /// [`Role::Assistant`].
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" | "developer" => Self::System,
            "user" | "human" => Self::User,
            "tool" | "function" => Self::Tool,
            _ => Self::Assistant,
        }
    }

    /// Lowercase wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a [`Source`] was discovered in tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A structured search-result record (`url`/`title` fields).
    SearchResult,
    /// A URL scraped from free text.
    WebLink,
}

/// A citation extracted from tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Resource URL.
    pub url: String,
    /// Human-readable title (falls back to the URL host).
    pub title: String,
    /// Discovery kind.
    #[serde(rename = "type")]
    pub kind: SourceKind,
}

/// A single entry in a research session's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Opaque unique identifier.
    pub id: String,
    /// Role of the message sender.
    pub role: Role,
    /// Message content (possibly empty).
    pub content: String,
    /// Tool calls requested by the assistant (only for `Role::Assistant`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Name of the tool that produced this message (only for `Role::Tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool call ID this message responds to (only for `Role::Tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Reasoning trace returned alongside the content, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Sources attached to this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl ConversationMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
            tool_call_id: None,
            reasoning: None,
            sources: Vec::new(),
        }
    }

    /// Returns `true` if this is an assistant message that requests tools.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Generates a fresh message identifier.
#[must_use]
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ConversationMessage {
    ConversationMessage::new(Role::System, content)
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ConversationMessage {
    ConversationMessage::new(Role::User, content)
}

/// Creates an assistant message, optionally carrying tool calls and a
/// reasoning trace.
#[must_use]
pub fn assistant_message(
    content: &str,
    tool_calls: Vec<ToolCall>,
    reasoning: Option<String>,
) -> ConversationMessage {
    ConversationMessage {
        tool_calls,
        reasoning: reasoning.filter(|r| !r.is_empty()),
        ..ConversationMessage::new(Role::Assistant, content)
    }
}

/// Creates a tool result message.
#[must_use]
pub fn tool_message(tool_call_id: &str, tool_name: &str, content: &str) -> ConversationMessage {
    ConversationMessage {
        tool_name: Some(tool_name.to_string()),
        tool_call_id: Some(tool_call_id.to_string()),
        ..ConversationMessage::new(Role::Tool, content)
    }
}

/// Generation parameters passed through to the provider untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling probability.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Presence penalty.
    pub presence_penalty: Option<f32>,
}

/// A chat completion request (provider-agnostic).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ConversationMessage>,
    /// Opaque generation parameters.
    pub params: GenerationParams,
    /// Stream the response.
    pub stream: bool,
    /// Tool definitions available to the model.
    pub tools: Vec<ToolDefinition>,
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Adds another completion's usage to this total.
    pub const fn accumulate(&mut self, other: &Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// A chat completion response (provider-agnostic).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Generated text content.
    pub content: String,
    /// Reasoning trace, for models that return one.
    pub reasoning: Option<String>,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Finish reason from the model (e.g., `"stop"`, `"tool_calls"`).
    pub finish_reason: Option<String>,
}
