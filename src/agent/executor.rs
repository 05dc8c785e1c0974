//! Tool dispatcher.
//!
//! Resolves tool calls against a [`ToolRegistry`] and runs them. Every
//! failure mode (unknown tool, bad arguments, tool error, timeout, panic)
//! is captured as a failed [`ToolResult`]; nothing here returns `Err`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use super::tool::{ToolCall, ToolRegistry, ToolResult};
use crate::error::AgentError;

/// Maximum raw byte length of tool argument JSON from the LLM.
const MAX_TOOL_ARGS_LEN: usize = 100_000;

/// Outcome of one dispatched tool call.
#[derive(Debug, Clone)]
pub struct DispatchedCall {
    /// The call as requested by the model.
    pub call: ToolCall,
    /// Execution result.
    pub result: ToolResult,
    /// Whether the requested tool exists in the registry.
    pub tool_found: bool,
}

impl DispatchedCall {
    /// Text recorded in the conversation log for this call.
    #[must_use]
    pub fn message_content(&self) -> String {
        if self.tool_found {
            self.result.message_content()
        } else {
            self.result.error.clone().unwrap_or_default()
        }
    }
}

/// Executes tool calls with per-call isolation and a deadline.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolDispatcher {
    /// Creates a dispatcher over the given registry.
    #[must_use]
    pub const fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Registry this dispatcher resolves names against.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Executes `tool_name` with already-decoded arguments.
    ///
    /// Unknown names produce a failed result rather than an error.
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolResult {
        let Some(tool) = self.registry.get(tool_name) else {
            return ToolResult::failure(
                AgentError::ToolNotFound {
                    name: tool_name.to_string(),
                }
                .to_string(),
            );
        };

        // Run on its own task so a panicking tool is reported, not propagated.
        let name = tool_name.to_string();
        let mut handle = tokio::spawn(async move { tool.execute(args).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => ToolResult::failure(
                AgentError::ToolExecution {
                    name,
                    message: format!("tool task aborted: {join_err}"),
                }
                .to_string(),
            ),
            Err(_) => {
                handle.abort();
                ToolResult::failure(
                    AgentError::ToolTimeout {
                        name,
                        seconds: self.timeout.as_secs(),
                    }
                    .to_string(),
                )
            }
        }
    }

    /// Dispatches a single model-issued call.
    ///
    /// Validates raw argument size and JSON shape before execution.
    pub async fn dispatch(&self, call: &ToolCall) -> DispatchedCall {
        let tool_found = self.registry.get(&call.name).is_some();

        let result = if !tool_found {
            warn!(tool = %call.name, call_id = %call.id, "tool not found");
            ToolResult::failure(
                AgentError::ToolNotFound {
                    name: call.name.clone(),
                }
                .to_string(),
            )
        } else {
            match decode_arguments(&call.arguments) {
                Ok(args) => self.execute(&call.name, args).await,
                Err(message) => ToolResult::failure(message),
            }
        };

        debug!(
            tool = %call.name,
            call_id = %call.id,
            success = result.success,
            "tool execution complete"
        );

        DispatchedCall {
            call: call.clone(),
            result,
            tool_found,
        }
    }

    /// Dispatches all calls from one turn concurrently.
    ///
    /// Results are returned in the order the calls were declared.
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<DispatchedCall> {
        join_all(calls.iter().map(|call| self.dispatch(call))).await
    }
}

/// Decodes a raw arguments string. Empty input means no arguments.
fn decode_arguments(raw: &str) -> Result<Value, String> {
    if raw.len() > MAX_TOOL_ARGS_LEN {
        return Err(format!(
            "tool arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
            raw.len()
        ));
    }
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("invalid arguments: expected a JSON object, got {other}")),
        Err(e) => Err(format!("invalid arguments: {e}")),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::tool::Tool;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its text argument"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, args: Value) -> ToolResult {
            match args.get("text").and_then(Value::as_str) {
                Some(text) => ToolResult::ok(text),
                None => ToolResult::failure("missing text"),
            }
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ToolResult::ok("late")
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            panic!("tool blew up")
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn description(&self) -> &str {
            "counts invocations"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            ToolResult::ok(format!("call {n}"))
        }
    }

    fn dispatcher(timeout: Duration) -> ToolDispatcher {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(Echo))
            .with_tool(Arc::new(Sleepy))
            .with_tool(Arc::new(Panicky));
        ToolDispatcher::new(Arc::new(registry), timeout)
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let d = dispatcher(Duration::from_secs(5));
        let out = d.dispatch(&call("c1", "echo", r#"{"text":"hi"}"#)).await;
        assert!(out.tool_found);
        assert!(out.result.success);
        assert_eq!(out.message_content(), "hi");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let d = dispatcher(Duration::from_secs(5));
        let out = d.dispatch(&call("c1", "teleport", "{}")).await;
        assert!(!out.tool_found);
        assert!(!out.result.success);
        assert!(out.message_content().contains("teleport"));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_is_failure() {
        let d = dispatcher(Duration::from_secs(5));
        let result = d.execute("nope", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Tool 'nope' not found"));
    }

    #[tokio::test]
    async fn test_dispatch_invalid_arguments() {
        let d = dispatcher(Duration::from_secs(5));
        let out = d.dispatch(&call("c1", "echo", "{not json")).await;
        assert!(out.tool_found);
        assert!(!out.result.success);
        assert!(out.message_content().starts_with("Tool error: invalid arguments"));
    }

    #[tokio::test]
    async fn test_dispatch_non_object_arguments() {
        let d = dispatcher(Duration::from_secs(5));
        let out = d.dispatch(&call("c1", "echo", "[1,2]")).await;
        assert!(!out.result.success);
    }

    #[tokio::test]
    async fn test_dispatch_oversized_arguments() {
        let d = dispatcher(Duration::from_secs(5));
        let big = format!(r#"{{"text":"{}"}}"#, "x".repeat(MAX_TOOL_ARGS_LEN));
        let out = d.dispatch(&call("c1", "echo", &big)).await;
        assert!(!out.result.success);
        assert!(out.message_content().contains("too large"));
    }

    #[tokio::test]
    async fn test_empty_arguments_are_empty_object() {
        let d = dispatcher(Duration::from_secs(5));
        let out = d.dispatch(&call("c1", "echo", "")).await;
        assert_eq!(out.result.error.as_deref(), Some("missing text"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let d = dispatcher(Duration::from_millis(20));
        let out = d.dispatch(&call("c1", "sleepy", "{}")).await;
        assert!(!out.result.success);
        assert!(out.message_content().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let d = dispatcher(Duration::from_secs(5));
        let out = d.dispatch(&call("c1", "panicky", "{}")).await;
        assert!(!out.result.success);
        assert!(out.message_content().contains("panicky"));
    }

    #[tokio::test]
    async fn test_dispatch_all_preserves_order_and_isolates_failures() {
        let d = dispatcher(Duration::from_secs(5));
        let calls = vec![
            call("a", "echo", r#"{"text":"first"}"#),
            call("b", "panicky", "{}"),
            call("c", "missing", "{}"),
            call("d", "echo", r#"{"text":"last"}"#),
        ];
        let outcomes = d.dispatch_all(&calls).await;
        let ids: Vec<&str> = outcomes.iter().map(|o| o.call.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(outcomes[0].result.success);
        assert!(!outcomes[1].result.success);
        assert!(!outcomes[2].tool_found);
        assert_eq!(outcomes[3].result.content, "last");
    }

    #[tokio::test]
    async fn test_each_call_executes_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry =
            ToolRegistry::new().with_tool(Arc::new(Counting(Arc::clone(&counter))));
        let d = ToolDispatcher::new(Arc::new(registry), Duration::from_secs(5));
        let calls = vec![call("a", "counting", "{}"), call("b", "counting", "{}")];
        let _ = d.dispatch_all(&calls).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
