//! System prompts for research sessions.
//!
//! The system prompt fixes the textual protocol with the model: tool schemas
//! inside `<tools>`, calls inside `<tool_call>`, and the final answer inside
//! `<answer>`.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::tool::ToolDefinition;

/// Placeholder replaced by the rendered tool schemas.
pub const TOOL_SCHEMAS_PLACEHOLDER: &str = "{tool_schemas}";

/// Default system prompt template.
pub const RESEARCH_SYSTEM_PROMPT: &str = r#"You are a deep research assistant. Your core function is to conduct thorough, multi-source investigations into any topic. You must handle both broad, open-domain inquiries and queries within specialized academic fields.

For every request, synthesize information from credible, diverse sources to deliver a comprehensive, accurate, and objective response.

When you have gathered sufficient information and are ready to provide the definitive response, you must enclose the entire final answer within <answer></answer> tags.

# Tools

You may call one or more functions to assist with the user query. You are provided with function signatures within <tools></tools> XML tags:

<tools>
{tool_schemas}
</tools>

For each function call, return a json object with function name and arguments within <tool_call></tool_call> XML tags:
<tool_call>
{"name": <function-name>, "arguments": <args-json-object>}
</tool_call>

To run Python code, pass empty arguments and place the code immediately after the JSON object, inside <code></code> tags within the same <tool_call> block."#;

/// Default scratch instruction appended before each model call in reasoning mode.
pub const REASONING_PROMPT: &str = "\n\n<think>\nLet me analyze what I know so far and determine the best next step for this research task.\n\n";

/// Default prompt directory relative to the user's home.
const DEFAULT_PROMPT_DIR: &str = ".config/deep-research/prompts";
/// Filename for the system prompt template.
const SYSTEM_FILENAME: &str = "system.md";
/// Filename for the reasoning instruction.
const REASONING_FILENAME: &str = "reasoning.md";

/// Prompts used by a research session.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    /// System prompt template (contains [`TOOL_SCHEMAS_PLACEHOLDER`]).
    pub system: String,
    /// Reasoning scratch instruction.
    pub reasoning: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::defaults()
    }
}

impl PromptSet {
    /// Loads prompts from the given directory, falling back to compiled-in defaults.
    ///
    /// Resolution order for `prompt_dir`:
    /// 1. Explicit `prompt_dir` argument
    /// 2. `DR_PROMPT_DIR` environment variable
    /// 3. `~/.config/deep-research/prompts/`
    ///
    /// Each file is loaded independently; a missing file uses its default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(PathBuf::from)
            .or_else(|| std::env::var("DR_PROMPT_DIR").ok().map(PathBuf::from))
            .or_else(Self::default_dir);

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            system: load_file(SYSTEM_FILENAME, RESEARCH_SYSTEM_PROMPT),
            reasoning: load_file(REASONING_FILENAME, REASONING_PROMPT),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            system: RESEARCH_SYSTEM_PROMPT.to_string(),
            reasoning: REASONING_PROMPT.to_string(),
        }
    }

    /// Renders the system prompt for the given tools and date.
    ///
    /// Each tool schema is one JSON line inside the `<tools>` block. A
    /// template without the placeholder gets the schemas appended instead.
    #[must_use]
    pub fn render_system_prompt(&self, tools: &[ToolDefinition], today: NaiveDate) -> String {
        let schemas = tools
            .iter()
            .map(|t| t.to_function_schema().to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = if self.system.contains(TOOL_SCHEMAS_PLACEHOLDER) {
            self.system.replace(TOOL_SCHEMAS_PLACEHOLDER, &schemas)
        } else if schemas.is_empty() {
            self.system.clone()
        } else {
            format!("{}\n\n<tools>\n{schemas}\n</tools>", self.system)
        };

        let _ = write!(prompt, "\n\nCurrent date: {}", today.format("%Y-%m-%d"));
        prompt
    }

    /// Writes the compiled-in default prompts to the given directory.
    ///
    /// Creates the directory if it does not exist. Existing files are
    /// **not** overwritten.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let templates = [
            (SYSTEM_FILENAME, RESEARCH_SYSTEM_PROMPT),
            (REASONING_FILENAME, REASONING_PROMPT),
        ];

        let mut written = Vec::new();
        for (filename, content) in &templates {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }

    /// Returns the default prompt directory under the user's home.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR))
    }
}

/// Combines a research query with optional caller instructions.
#[must_use]
pub fn build_user_query(query: &str, instructions: Option<&str>) -> String {
    match instructions.map(str::trim).filter(|i| !i.is_empty()) {
        Some(extra) => format!("{}\n\n{extra}", query.trim()),
        None => query.trim().to_string(),
    }
}
