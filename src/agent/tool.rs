//! Tool types and the tool registry.
//!
//! Provides provider-agnostic types for tool definitions, calls, and
//! results, the [`Tool`] trait every capability implements, and the
//! name-keyed [`ToolRegistry`] injected into each research session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the registry key).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Renders this definition in the `{"type": "function", ...}` envelope
    /// used inside the system prompt.
    #[must_use]
    pub fn to_function_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

/// The result of executing a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool succeeded.
    pub success: bool,
    /// Text output.
    pub content: String,
    /// Optional structured metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result with text content.
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            metadata: None,
            error: None,
        }
    }

    /// Failed result with an error description.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            metadata: None,
            error: Some(error.into()),
        }
    }

    /// Attaches structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Text fed back to the model for this result.
    #[must_use]
    pub fn message_content(&self) -> String {
        if self.success {
            self.content.clone()
        } else {
            format!(
                "Tool error: {}",
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// An executable capability the model can invoke.
///
/// Implementations must not fail by panicking or by returning early: every
/// failure is reported as a [`ToolResult`] with `success == false`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key and the name the model calls.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Executes the tool with decoded arguments.
    async fn execute(&self, args: Value) -> ToolResult;

    /// Function-calling definition for this tool.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Name-keyed set of tools available to a session.
///
/// Preserves registration order so prompts and provider requests list tools
/// deterministically. Registering a tool whose name already exists replaces
/// the earlier entry.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
    }

    /// Builder-style [`ToolRegistry::register`].
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Registered tool names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Function-calling definitions for all registered tools.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            self.1
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _args: Value) -> ToolResult {
            ToolResult::ok(self.1)
        }
    }

    #[test]
    fn test_registry_lookup_and_order() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(Named("search", "a")))
            .with_tool(Arc::new(Named("visit", "b")));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["search", "visit"]);
        assert!(registry.get("visit").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_replaces_same_name() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(Named("search", "first")))
            .with_tool(Arc::new(Named("search", "second")));
        assert_eq!(registry.len(), 1);
        let defs = registry.definitions();
        assert_eq!(defs[0].description, "second");
    }

    #[test]
    fn test_function_schema_envelope() {
        let def = Named("search", "web search").definition();
        let schema = def.to_function_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "search");
        assert_eq!(schema["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tool_result_message_content() {
        assert_eq!(ToolResult::ok("fine").message_content(), "fine");
        assert_eq!(
            ToolResult::failure("boom").message_content(),
            "Tool error: boom"
        );
    }

    #[test]
    fn test_tool_result_serialization() {
        let result = ToolResult::ok(r#"[{"url":"http://x.com"}]"#)
            .with_metadata(json!({"queries": ["x"]}));
        let json = serde_json::to_string(&result).unwrap_or_default();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("queries"));
        assert!(!json.contains("\"error\""));
    }
}
