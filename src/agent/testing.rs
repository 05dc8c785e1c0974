//! Scripted providers, tools and observers shared by unit tests.

#![allow(clippy::panic)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::message::{ChatRequest, ChatResponse, ConversationMessage};
use super::parse::{ANSWER_CLOSE, ANSWER_OPEN};
use super::provider::{DeltaStream, LlmProvider, StreamDelta, ToolCallDelta};
use super::session::SessionObserver;
use super::tool::{Tool, ToolCall, ToolResult};
use crate::error::AgentError;

/// Response with plain content.
pub fn plain(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        ..ChatResponse::default()
    }
}

/// Response wrapping `text` in answer delimiters.
pub fn answer(text: &str) -> ChatResponse {
    plain(&format!("Done.\n{ANSWER_OPEN}{text}{ANSWER_CLOSE}"))
}

/// A native tool call.
pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

/// Provider replaying a fixed script, then a fallback response.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ChatResponse, AgentError>>>,
    fallback: ChatResponse,
    calls: AtomicUsize,
    delay: Duration,
    last_tail: Mutex<Option<String>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ChatResponse, AgentError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: plain("idle"),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            last_tail: Mutex::new(None),
        }
    }

    /// Always returns `response`.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            fallback: response,
            ..Self::new(Vec::new())
        }
    }

    /// Rate-limits `failures` times, then always returns `response`.
    pub fn rate_limited_then(failures: usize, response: ChatResponse) -> Self {
        let script = (0..failures)
            .map(|i| {
                Err(AgentError::RateLimited {
                    message: format!("slow down {i}"),
                })
            })
            .collect();
        Self {
            fallback: response,
            ..Self::new(script)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content of the last message of the most recent request.
    pub fn last_request_tail(&self) -> Option<String> {
        self.last_tail.lock().ok().and_then(|t| t.clone())
    }

    async fn next(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut tail) = self.last_tail.lock() {
            *tail = request.messages.last().map(|m| m.content.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        scripted.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        self.next(request).await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, AgentError> {
        let response = self.next(request).await?;
        let mut deltas: Vec<Result<StreamDelta, AgentError>> = response
            .content
            .split_inclusive(' ')
            .map(|piece| Ok(StreamDelta::text(piece)))
            .collect();
        for (index, call) in (0_u32..).zip(response.tool_calls) {
            deltas.push(Ok(StreamDelta {
                tool_calls: vec![ToolCallDelta {
                    index,
                    id: Some(call.id),
                    name: Some(call.name),
                    arguments: Some(call.arguments),
                }],
                ..StreamDelta::default()
            }));
        }
        Ok(Box::pin(stream::iter(deltas)))
    }
}

/// Echoes its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the text argument"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
    }

    async fn execute(&self, args: Value) -> ToolResult {
        match args.get("text").and_then(Value::as_str) {
            Some(text) => ToolResult::ok(text),
            None => ToolResult::failure("missing 'text'"),
        }
    }
}

/// Cancels the given token when executed, then succeeds.
pub struct CancellingTool(pub CancellationToken);

#[async_trait]
impl Tool for CancellingTool {
    fn name(&self) -> &str {
        "cancel_now"
    }

    fn description(&self) -> &str {
        "Cancels the running session"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        self.0.cancel();
        ToolResult::ok("cancelled")
    }
}

/// Records the ids of observed messages.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub ids: Vec<String>,
}

#[async_trait]
impl SessionObserver for RecordingObserver {
    async fn on_message(&mut self, _session_id: &str, message: &ConversationMessage) {
        self.ids.push(message.id.clone());
    }
}
