//! Built-in research tools.
//!
//! Each tool is an opaque capability behind the
//! [`Tool`](crate::agent::tool::Tool) trait. Failures
//! are reported as failed [`ToolResult`](crate::agent::tool::ToolResult)
//! values, never as errors.

mod file_search;
mod python;
mod web_search;
mod web_visit;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent::tool::ToolRegistry;

pub use file_search::LocalFileSearchTool;
pub use python::PythonInterpreterTool;
pub use web_search::{SearchEndpoint, SerperSearchTool};
pub use web_visit::WebVisitTool;

/// Default Serper API root.
pub const DEFAULT_SERPER_URL: &str = "https://google.serper.dev";
/// Default results per search query.
const DEFAULT_SEARCH_MAX_RESULTS: usize = 10;
/// Default page fetch timeout in seconds.
const DEFAULT_VISIT_TIMEOUT_SECS: u64 = 30;
/// Default code execution timeout in seconds.
const DEFAULT_PYTHON_TIMEOUT_SECS: u64 = 60;
/// Default interpreter binary.
const DEFAULT_PYTHON_BIN: &str = "python3";

/// Settings for the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Serper API key; search tools are only registered when set.
    pub serper_api_key: Option<String>,
    /// Serper API root.
    pub serper_url: String,
    /// Results requested per search query.
    pub search_max_results: usize,
    /// Page fetch timeout.
    pub visit_timeout: Duration,
    /// Code execution timeout.
    pub python_timeout: Duration,
    /// Interpreter invoked as `<bin> -c <code>`.
    pub python_bin: String,
    /// Base directory for local file search (current directory if unset).
    pub file_search_root: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            serper_api_key: None,
            serper_url: DEFAULT_SERPER_URL.to_string(),
            search_max_results: DEFAULT_SEARCH_MAX_RESULTS,
            visit_timeout: Duration::from_secs(DEFAULT_VISIT_TIMEOUT_SECS),
            python_timeout: Duration::from_secs(DEFAULT_PYTHON_TIMEOUT_SECS),
            python_bin: DEFAULT_PYTHON_BIN.to_string(),
            file_search_root: None,
        }
    }
}

impl ToolsConfig {
    /// Reads tool settings from the environment, falling back to defaults.
    ///
    /// | Variable | Setting |
    /// |----------|---------|
    /// | `SERPER_API_KEY` | `serper_api_key` |
    /// | `SERPER_BASE_URL` | `serper_url` |
    /// | `DR_SEARCH_MAX_RESULTS` | `search_max_results` |
    /// | `DR_VISIT_TIMEOUT_SECS` | `visit_timeout` |
    /// | `DR_PYTHON_TIMEOUT_SECS` | `python_timeout` |
    /// | `DR_PYTHON_BIN` | `python_bin` |
    /// | `DR_FILE_SEARCH_ROOT` | `file_search_root` |
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let secs = |key: &str| {
            env(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Self {
            serper_api_key: env("SERPER_API_KEY"),
            serper_url: env("SERPER_BASE_URL").unwrap_or(defaults.serper_url),
            search_max_results: env("DR_SEARCH_MAX_RESULTS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.search_max_results),
            visit_timeout: secs("DR_VISIT_TIMEOUT_SECS").unwrap_or(defaults.visit_timeout),
            python_timeout: secs("DR_PYTHON_TIMEOUT_SECS").unwrap_or(defaults.python_timeout),
            python_bin: env("DR_PYTHON_BIN").unwrap_or(defaults.python_bin),
            file_search_root: env("DR_FILE_SEARCH_ROOT").map(PathBuf::from),
        }
    }

    /// Sets the Serper API key.
    #[must_use]
    pub fn with_serper_key(mut self, key: impl Into<String>) -> Self {
        self.serper_api_key = Some(key.into());
        self
    }
}

impl ToolRegistry {
    /// Registry with the built-in tools.
    ///
    /// `search` and `google_scholar` are only present when a Serper key is
    /// configured.
    #[must_use]
    pub fn with_defaults(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        let serper_key = config
            .serper_api_key
            .as_deref()
            .filter(|k| !k.is_empty());

        if let Some(key) = serper_key {
            registry.register(Arc::new(SerperSearchTool::new(
                SearchEndpoint::Web,
                key,
                config,
            )));
        }
        registry.register(Arc::new(WebVisitTool::new(config.visit_timeout)));
        if let Some(key) = serper_key {
            registry.register(Arc::new(SerperSearchTool::new(
                SearchEndpoint::Scholar,
                key,
                config,
            )));
        }
        registry.register(Arc::new(PythonInterpreterTool::new(
            &config.python_bin,
            config.python_timeout,
        )));
        registry.register(Arc::new(LocalFileSearchTool::new(
            config.file_search_root.clone(),
        )));

        registry
    }
}

/// Reads `key` as a list of strings, accepting a bare string too.
fn string_list(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Truncates to `max` characters, marking the cut with `...`.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_defaults_without_serper_key() {
        let registry = ToolRegistry::with_defaults(&ToolsConfig::default());
        assert_eq!(
            registry.names(),
            vec!["visit", "python_interpreter", "local_file_search"]
        );
    }

    #[test]
    fn test_defaults_with_serper_key() {
        let config = ToolsConfig::default().with_serper_key("k");
        let registry = ToolRegistry::with_defaults(&config);
        assert_eq!(
            registry.names(),
            vec![
                "search",
                "visit",
                "google_scholar",
                "python_interpreter",
                "local_file_search"
            ]
        );
    }

    #[test]
    fn test_empty_serper_key_is_ignored() {
        let config = ToolsConfig::default().with_serper_key("");
        let registry = ToolRegistry::with_defaults(&config);
        assert!(registry.get("search").is_none());
    }

    #[test]
    fn test_every_default_tool_has_object_schema() {
        let config = ToolsConfig::default().with_serper_key("k");
        for def in ToolRegistry::with_defaults(&config).definitions() {
            assert_eq!(def.parameters["type"], "object", "{}", def.name);
            assert!(!def.description.is_empty());
        }
    }

    #[test_case(json!({"query": "rust"}), vec!["rust"] ; "bare string")]
    #[test_case(json!({"query": ["a", "b"]}), vec!["a", "b"] ; "array")]
    #[test_case(json!({"query": ["a", 3, " "]}), vec!["a"] ; "non strings dropped")]
    #[test_case(json!({"query": 3}), Vec::<&str>::new() ; "wrong type")]
    #[test_case(json!({}), Vec::<&str>::new() ; "missing")]
    fn test_string_list(args: Value, expected: Vec<&str>) {
        assert_eq!(string_list(&args, "query"), expected);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll...");
    }
}
