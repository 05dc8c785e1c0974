//! Output formatting for CLI results.

use std::fmt::Write as _;

use crate::agent::message::Source;
use crate::agent::stream::{ApiMessage, MessageType, ResearchResponse, StreamEvent};
use crate::agent::tool::ToolDefinition;

/// Characters of tool output shown in streamed text mode.
const TOOL_PREVIEW_CHARS: usize = 300;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON (pretty for results, one object per line for streamed events).
    Json,
}

impl OutputFormat {
    /// Parses a format name; anything unrecognized is text.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "ndjson" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Renders a finished session as text.
#[must_use]
pub fn format_research(response: &ResearchResponse) -> String {
    let mut output = response
        .final_answer
        .clone()
        .unwrap_or_else(|| "(no answer)".to_string());

    if !response.sources.is_empty() {
        output.push_str("\n\nSources:\n");
        output.push_str(&format_sources(&response.sources));
    }

    let tools = if response.tools_used.is_empty() {
        "none".to_string()
    } else {
        response.tools_used.join(", ")
    };
    let _ = write!(
        output,
        "\n\n---\nSession: {} | Iterations: {} | Tools: {tools}",
        response.session_id, response.iterations
    );
    if let Some(ref error) = response.error {
        let _ = write!(output, "\nError: {error}");
    }
    output
}

fn format_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {} - {}", i + 1, s.title, s.url))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders one streamed event as text.
#[must_use]
pub fn format_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Message(m) => format_message(&m.message),
        StreamEvent::Complete(done) => {
            let mut output = format!(
                "== answer ==\n{}",
                done.final_answer.as_deref().unwrap_or("(no answer)")
            );
            if !done.sources.is_empty() {
                output.push_str("\n\nSources:\n");
                output.push_str(&format_sources(&done.sources));
            }
            let _ = write!(output, "\n\n---\nIterations: {}", done.iterations);
            output
        }
        StreamEvent::Error(e) => format!("== error ==\n{}", e.error),
    }
}

fn format_message(message: &ApiMessage) -> String {
    match message.kind {
        MessageType::Tool => {
            let name = message.tool_name.as_deref().unwrap_or("tool");
            let preview: String = message.content.chars().take(TOOL_PREVIEW_CHARS).collect();
            let ellipsis = if message.content.chars().count() > TOOL_PREVIEW_CHARS {
                "..."
            } else {
                ""
            };
            format!("[tool:{name}] {preview}{ellipsis}")
        }
        MessageType::Agent if !message.tool_calls.is_empty() => {
            let calls: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
            format!(
                "[agent] {}\n  -> calling: {}",
                message.content.trim(),
                calls.join(", ")
            )
        }
        MessageType::Agent => format!("[agent] {}", message.content.trim()),
        MessageType::User => format!("[user] {}", message.content),
        MessageType::System => format!("[system] {}", message.content),
    }
}

/// Renders the tool list as text.
#[must_use]
pub fn format_tools(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return "No tools registered.".to_string();
    }
    let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
    tools
        .iter()
        .map(|t| format!("{:width$}  {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}
