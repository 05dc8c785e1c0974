//! Event streaming: the external message shape and the event channel.
//!
//! [`EventEmitter`] is a [`SessionObserver`] that converts each appended
//! message to an [`ApiMessage`] and pushes it onto a bounded channel. After
//! the session ends it pushes exactly one `complete` or `error` event.
//! [`ResearchStream`] is the consumer side; dropping it cancels the session.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::message::{ConversationMessage, Role, Source, new_message_id};
use super::session::{ResearchResult, SessionObserver};
use super::sources::{dedup_sources, extract_sources, is_source_bearing};
use super::tool::ToolCall;

/// Message type as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Model output.
    Agent,
    /// Tool result.
    Tool,
}

impl MessageType {
    /// Maps a free-form role string; unknown roles are [`MessageType::Agent`].
    #[must_use]
    pub fn from_role_str(role: &str) -> Self {
        Self::from(Role::from_str_lossy(role))
    }
}

impl From<Role> for MessageType {
    fn from(role: Role) -> Self {
        match role {
            Role::System => Self::System,
            Role::User => Self::User,
            Role::Assistant => Self::Agent,
            Role::Tool => Self::Tool,
        }
    }
}

impl From<MessageType> for Role {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::System => Self::System,
            MessageType::User => Self::User,
            MessageType::Agent => Self::Assistant,
            MessageType::Tool => Self::Tool,
        }
    }
}

/// A conversation message in the shape clients consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMessage {
    /// Message id.
    pub id: String,
    /// Client-facing message type.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Message text.
    pub content: String,
    /// Producing tool, for tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Correlated tool call, for tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls requested by an agent message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Raw role string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Citations found in tool output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl From<&ConversationMessage> for ApiMessage {
    /// Converts a log message, extracting sources from source-bearing tools.
    fn from(message: &ConversationMessage) -> Self {
        let sources = if !message.sources.is_empty() {
            message.sources.clone()
        } else if message.role == Role::Tool
            && message.tool_name.as_deref().is_some_and(is_source_bearing)
        {
            extract_sources(&message.content)
        } else {
            Vec::new()
        };

        Self {
            id: message.id.clone(),
            kind: MessageType::from(message.role),
            content: message.content.clone(),
            tool_name: message.tool_name.clone(),
            tool_call_id: message.tool_call_id.clone(),
            tool_calls: message.tool_calls.clone(),
            role: Some(message.role.as_str().to_string()),
            sources,
        }
    }
}

impl From<ApiMessage> for ConversationMessage {
    fn from(message: ApiMessage) -> Self {
        let role = message
            .role
            .as_deref()
            .map_or_else(|| Role::from(message.kind), Role::from_str_lossy);
        Self {
            id: if message.id.is_empty() {
                new_message_id()
            } else {
                message.id
            },
            role,
            content: message.content,
            tool_calls: message.tool_calls,
            tool_name: message.tool_name,
            tool_call_id: message.tool_call_id,
            reasoning: None,
            sources: message.sources,
        }
    }
}

/// Payload of a `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// Session trace token.
    pub session_id: String,
    /// The converted message.
    #[serde(flatten)]
    pub message: ApiMessage,
}

/// Payload of the `complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteEvent {
    /// Session trace token.
    pub session_id: String,
    /// All sources seen during the session, first occurrence of each URL.
    pub sources: Vec<Source>,
    /// Distinct tool names used, sorted.
    pub tools_used: Vec<String>,
    /// Final answer or budget notice.
    pub final_answer: Option<String>,
    /// Model calls made.
    pub iterations: u32,
}

/// Payload of the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Session trace token.
    pub session_id: String,
    /// Error description.
    pub error: String,
}

/// A frame delivered to streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A message was appended to the log.
    Message(MessageEvent),
    /// The session completed.
    Complete(CompleteEvent),
    /// The session failed or was cancelled.
    Error(ErrorEvent),
}

impl StreamEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Message(e) => &e.session_id,
            Self::Complete(e) => &e.session_id,
            Self::Error(e) => &e.session_id,
        }
    }

    /// Whether this is the last event of a session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    /// Renders a server-sent-events frame: `data: <json>\n\n`.
    #[must_use]
    pub fn to_sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","data":{{"sessionId":"","error":"{e}"}}}}"#)
        });
        format!("data: {json}\n\n")
    }
}

/// A finished session in the shape clients consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResponse {
    /// Completed without a model failure or cancellation.
    pub success: bool,
    /// Final answer, budget notice, or failure description.
    pub final_answer: Option<String>,
    /// Conversation log with extracted sources.
    pub messages: Vec<ApiMessage>,
    /// Distinct tool names used, sorted.
    pub tools_used: Vec<String>,
    /// Model calls made.
    pub iterations: u32,
    /// Whether the session reached completion.
    pub is_complete: bool,
    /// Failure description, only when unsuccessful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Session trace token.
    pub session_id: String,
    /// All sources, first occurrence of each URL.
    pub sources: Vec<Source>,
}

impl From<&ResearchResult> for ResearchResponse {
    fn from(result: &ResearchResult) -> Self {
        let messages: Vec<ApiMessage> = result.messages.iter().map(ApiMessage::from).collect();
        let sources = dedup_sources(messages.iter().flat_map(|m| &m.sources));
        Self {
            success: result.success,
            final_answer: result.final_answer.clone(),
            messages,
            tools_used: result.tools_used.clone(),
            iterations: result.iterations,
            is_complete: result.is_complete,
            error: if result.success {
                None
            } else {
                result.error.clone()
            },
            session_id: result.session_id.clone(),
            sources,
        }
    }
}

/// Observer that forwards session messages as [`StreamEvent`]s.
///
/// A failed send means the consumer is gone; the emitter then cancels the
/// session and drops any further events.
#[derive(Debug)]
pub struct EventEmitter {
    tx: mpsc::Sender<StreamEvent>,
    pacing: Duration,
    cancel: CancellationToken,
    sources: Vec<Source>,
    closed: bool,
}

impl EventEmitter {
    /// Creates an emitter over `tx` that cancels `cancel` on disconnect.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<StreamEvent>, pacing: Duration, cancel: CancellationToken) -> Self {
        Self {
            tx,
            pacing,
            cancel,
            sources: Vec::new(),
            closed: false,
        }
    }

    async fn send(&mut self, event: StreamEvent) {
        if self.closed {
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("event consumer disconnected, cancelling session");
            self.closed = true;
            self.cancel.cancel();
            return;
        }
        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
    }

    /// Emits the terminal event for `result` and closes the channel.
    ///
    /// A successful session yields `complete`; anything else yields `error`.
    pub async fn finish(mut self, result: &ResearchResult) {
        let event = if result.success {
            StreamEvent::Complete(CompleteEvent {
                session_id: result.session_id.clone(),
                sources: dedup_sources(&self.sources),
                tools_used: result.tools_used.clone(),
                final_answer: result.final_answer.clone(),
                iterations: result.iterations,
            })
        } else {
            StreamEvent::Error(ErrorEvent {
                session_id: result.session_id.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "research session did not complete".to_string()),
            })
        };
        self.pacing = Duration::ZERO;
        self.send(event).await;
    }
}

#[async_trait]
impl SessionObserver for EventEmitter {
    async fn on_message(&mut self, session_id: &str, message: &ConversationMessage) {
        let api = ApiMessage::from(message);
        self.sources.extend(api.sources.iter().cloned());
        self.send(StreamEvent::Message(MessageEvent {
            session_id: session_id.to_string(),
            message: api,
        }))
        .await;
    }
}

/// Ordered stream of a session's events.
///
/// Dropping the stream cancels the session at its next suspension point.
pub struct ResearchStream {
    session_id: String,
    inner: ReceiverStream<StreamEvent>,
    _guard: DropGuard,
}

impl ResearchStream {
    /// Wraps a receiver; `cancel` fires when the stream is dropped.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        rx: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            inner: ReceiverStream::new(rx),
            _guard: cancel.drop_guard(),
        }
    }

    /// Session trace token.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Stream for ResearchStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for ResearchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchStream")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
