//! Textual contracts with the model: answer delimiters and tool-call blocks.
//!
//! The delimiter strings are part of the prompt protocol and must not change.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::tool::ToolCall;

/// Opens a final answer.
pub const ANSWER_OPEN: &str = "<answer>";
/// Closes a final answer.
pub const ANSWER_CLOSE: &str = "</answer>";
/// Opens a textual tool call.
pub const TOOL_CALL_OPEN: &str = "<tool_call>";
/// Closes a textual tool call.
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";

static TOOL_CALL_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").ok());

static CODE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<code>(.*?)</code>").ok());

static NAME_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""name"\s*:\s*"([^"]*)""#).ok());

/// Extracts the final answer from model content.
///
/// Returns the text between the first [`ANSWER_OPEN`] and the following
/// [`ANSWER_CLOSE`], trimmed. If the open delimiter has no matching close,
/// everything after it is the answer. Returns `None` without an open
/// delimiter.
#[must_use]
pub fn extract_final_answer(content: &str) -> Option<String> {
    let start = content.find(ANSWER_OPEN)? + ANSWER_OPEN.len();
    let rest = &content[start..];
    let body = rest.find(ANSWER_CLOSE).map_or(rest, |end| &rest[..end]);
    Some(body.trim().to_string())
}

/// Parses `<tool_call>` blocks embedded in assistant content.
///
/// Each block holds `{"name": ..., "arguments": {...}}`. A `<code>` section
/// inside the block is passed as the `code` argument. Calls receive ids
/// `call_<n>` starting at `first_index`.
///
/// A block whose JSON does not parse is still returned, with the raw block
/// text as its arguments, so the dispatcher reports it as a failed call.
#[must_use]
pub fn parse_tool_calls(content: &str, first_index: usize) -> Vec<ToolCall> {
    let Some(block_re) = TOOL_CALL_BLOCK.as_ref() else {
        return Vec::new();
    };

    block_re
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .enumerate()
        .map(|(offset, block)| parse_block(block.as_str(), first_index + offset))
        .collect()
}

fn parse_block(block: &str, index: usize) -> ToolCall {
    let id = format!("call_{index}");

    let (json_part, code) = match CODE_BLOCK.as_ref().and_then(|re| re.captures(block)) {
        Some(caps) => {
            let code = caps.get(1).map(|m| m.as_str().trim().to_string());
            let json_part = caps
                .get(0)
                .map_or(block, |whole| &block[..whole.start()]);
            (json_part.trim(), code)
        }
        None => (block.trim(), None),
    };

    let parsed = serde_json::from_str::<Value>(json_part).ok();
    let Some(Value::Object(mut obj)) = parsed else {
        return malformed(id, json_part);
    };
    let Some(Value::String(name)) = obj.remove("name") else {
        return malformed(id, json_part);
    };

    let mut arguments = match obj.remove("arguments") {
        Some(Value::Object(map)) => map,
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                return ToolCall {
                    id,
                    name,
                    arguments: raw,
                };
            }
        },
        Some(Value::Null) | None => serde_json::Map::new(),
        Some(other) => {
            return ToolCall {
                id,
                name,
                arguments: other.to_string(),
            };
        }
    };

    if let Some(code) = code {
        arguments.insert("code".to_string(), Value::String(code));
    }

    ToolCall {
        id,
        name,
        arguments: Value::Object(arguments).to_string(),
    }
}

fn malformed(id: String, raw: &str) -> ToolCall {
    let name = NAME_FIELD
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    // Non-JSON arguments make the dispatcher report the call as invalid.
    let arguments = if raw.is_empty() {
        "<empty tool call>".to_string()
    } else {
        raw.to_string()
    };
    ToolCall {
        id,
        name,
        arguments,
    }
}
