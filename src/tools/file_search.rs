//! Glob-style search over the local filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::{MatchOptions, Pattern, PatternError};
use serde_json::{Value, json};
use walkdir::WalkDir;

use super::truncate_chars;
use crate::agent::tool::{Tool, ToolResult};

/// Most files listed per search.
const MAX_FILES: usize = 20;
/// Files smaller than this get an inline preview.
const PREVIEW_MAX_BYTES: u64 = 5000;
/// Characters shown per preview.
const PREVIEW_CHARS: usize = 200;

/// Finds files matching a glob pattern below a base directory.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSearchTool {
    root: Option<PathBuf>,
}

impl LocalFileSearchTool {
    /// Creates a search tool rooted at `root` (current directory if `None`).
    #[must_use]
    pub const fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn search_dir(&self, directory: Option<&str>) -> PathBuf {
        let base = self
            .root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        match directory {
            Some(dir) if !dir.trim().is_empty() => base.join(dir),
            _ => base,
        }
    }
}

/// `*`, `?` and `[...]` stay within one path component; `**/` spans
/// zero or more directories.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn compile_pattern(pattern: &str) -> Result<Pattern, PatternError> {
    Pattern::new(pattern)
}

fn matches_path(pattern: &Pattern, rel: &str) -> bool {
    pattern.matches_with(rel, MATCH_OPTIONS)
}

/// Directory depth a pattern can reach, or `None` when unbounded.
fn pattern_depth(pattern: &str) -> Option<usize> {
    if pattern.contains("**") {
        None
    } else {
        Some(pattern.split('/').filter(|s| !s.is_empty()).count())
    }
}

fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn describe_file(path: &Path) -> String {
    let display = path.display();
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => return format!("- {display}\n  Error: {e}"),
    };

    let mut entry = format!("- {display} ({size} bytes)");
    if size < PREVIEW_MAX_BYTES {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                entry.push_str("\n  Content: ");
                entry.push_str(&truncate_chars(&content, PREVIEW_CHARS));
            }
            Err(e) => {
                entry.push_str("\n  Content error: ");
                entry.push_str(&e.to_string());
            }
        }
    }
    entry
}

#[async_trait]
impl Tool for LocalFileSearchTool {
    fn name(&self) -> &str {
        "local_file_search"
    }

    fn description(&self) -> &str {
        "Search for files in the local directory using patterns. Supports glob patterns like *.txt, *.py, etc."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match, e.g. \"*.md\" or \"**/*.py\"."
                },
                "directory": {
                    "type": "string",
                    "description": "Directory to search in, relative to the working directory."
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(pattern) = args
            .get("pattern")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
        else {
            return ToolResult::failure("missing required argument 'pattern'");
        };
        let dir = self.search_dir(args.get("directory").and_then(Value::as_str));
        let pattern = pattern.to_string();

        tokio::task::spawn_blocking(move || search_files(&dir, &pattern))
            .await
            .unwrap_or_else(|e| ToolResult::failure(format!("file search aborted: {e}")))
    }
}

/// Walks `dir` and reports files matching `pattern`.
fn search_files(dir: &Path, pattern: &str) -> ToolResult {
    if !dir.is_dir() {
        return ToolResult::failure(format!("Directory does not exist: {}", dir.display()));
    }

    let matcher = match compile_pattern(pattern) {
        Ok(p) => p,
        Err(e) => return ToolResult::failure(format!("invalid pattern '{pattern}': {e}")),
    };

    let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    if let Some(depth) = pattern_depth(pattern) {
        walker = walker.max_depth(depth);
    }

    let matches: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            relative_slash_path(dir, e.path()).is_some_and(|rel| matches_path(&matcher, &rel))
        })
        .map(walkdir::DirEntry::into_path)
        .collect();

    let metadata = json!({
        "pattern": pattern,
        "directory": dir.display().to_string(),
        "files_found": matches.len(),
        "results_shown": matches.len().min(MAX_FILES),
    });

    if matches.is_empty() {
        return ToolResult::ok(format!(
            "No files found matching pattern '{pattern}' in {}",
            dir.display()
        ))
        .with_metadata(metadata);
    }

    let mut summary = format!(
        "Found {} files matching '{pattern}' in {}",
        matches.len(),
        dir.display()
    );
    if matches.len() > MAX_FILES {
        summary.push_str(&format!(" (showing first {MAX_FILES})"));
    }

    let details: Vec<String> = matches
        .iter()
        .take(MAX_FILES)
        .map(|p| describe_file(p))
        .collect();

    ToolResult::ok(format!("{summary}\n\n{}", details.join("\n"))).with_metadata(metadata)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("*.md", "README.md", true)]
    #[test_case("*.md", "docs/guide.md", false)]
    #[test_case("**/*.md", "docs/guide.md", true)]
    #[test_case("**/*.md", "README.md", true)]
    #[test_case("docs/*.md", "docs/guide.md", true)]
    #[test_case("README*", "README.md", true)]
    #[test_case("file?.txt", "file1.txt", true)]
    #[test_case("file?.txt", "file10.txt", false)]
    #[test_case("a+b.txt", "a+b.txt", true)]
    #[test_case("*.[ch]", "main.c", true)]
    #[test_case("*.[ch]", "lib.h", true)]
    #[test_case("*.[ch]", "main.rs", false)]
    #[test_case("src/[!t]*.rs", "src/lib.rs", true)]
    #[test_case("src/[!t]*.rs", "src/test.rs", false)]
    fn test_pattern_matching(pattern: &str, path: &str, expected: bool) {
        let compiled = compile_pattern(pattern).unwrap_or_else(|e| panic!("pattern: {e}"));
        assert_eq!(matches_path(&compiled, path), expected, "{pattern} vs {path}");
    }

    #[tokio::test]
    async fn test_character_class_pattern() {
        let dir = fixture();
        for name in ["main.c", "util.h"] {
            std::fs::write(dir.path().join(name), "int x;")
                .unwrap_or_else(|e| panic!("write: {e}"));
        }
        let tool = LocalFileSearchTool::new(Some(dir.path().to_path_buf()));
        let result = tool.execute(json!({"pattern": "*.[ch]"})).await;

        assert!(result.success);
        assert!(result.content.starts_with("Found 2 files matching '*.[ch]'"));
        assert!(result.content.contains("main.c"));
        assert!(result.content.contains("util.h"));
        assert!(!result.content.contains("main.py"));
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_failure() {
        let dir = fixture();
        let tool = LocalFileSearchTool::new(Some(dir.path().to_path_buf()));
        let result = tool.execute(json!({"pattern": "[unclosed"})).await;
        assert!(!result.success);
        assert!(result.error.unwrap_or_default().starts_with("invalid pattern"));
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let write = |name: &str, content: &str| {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap_or_else(|e| panic!("mkdir: {e}"));
            }
            std::fs::write(&path, content).unwrap_or_else(|e| panic!("write: {e}"));
        };
        write("notes.md", "# Notes\nownership and borrowing");
        write("big.md", &"x".repeat(6000));
        write("docs/guide.md", "guide");
        write("main.py", "print(1)");
        dir
    }

    #[tokio::test]
    async fn test_top_level_pattern() {
        let dir = fixture();
        let tool = LocalFileSearchTool::new(Some(dir.path().to_path_buf()));
        let result = tool.execute(json!({"pattern": "*.md"})).await;

        assert!(result.success);
        assert!(result.content.starts_with("Found 2 files matching '*.md'"));
        assert!(result.content.contains("Content: # Notes"));
        assert!(!result.content.contains("guide.md"));
        // large files are listed without a preview
        let big_line = result
            .content
            .lines()
            .find(|l| l.contains("big.md"))
            .unwrap_or_default();
        assert!(big_line.ends_with("(6000 bytes)"));
        assert!(!result.content.contains("xxxx"));
    }

    #[tokio::test]
    async fn test_recursive_pattern_and_directory() {
        let dir = fixture();
        let tool = LocalFileSearchTool::new(Some(dir.path().to_path_buf()));

        let result = tool.execute(json!({"pattern": "**/*.md"})).await;
        assert!(result.content.starts_with("Found 3 files"));

        let result = tool
            .execute(json!({"pattern": "*.md", "directory": "docs"}))
            .await;
        assert!(result.content.starts_with("Found 1 files"));
    }

    #[tokio::test]
    async fn test_caps_listing() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        for i in 0..25 {
            std::fs::write(dir.path().join(format!("f{i:02}.txt")), "x")
                .unwrap_or_else(|e| panic!("write: {e}"));
        }
        let tool = LocalFileSearchTool::new(Some(dir.path().to_path_buf()));
        let result = tool.execute(json!({"pattern": "*.txt"})).await;

        assert!(result.content.contains("(showing first 20)"));
        assert_eq!(result.content.lines().filter(|l| l.starts_with("- ")).count(), 20);
    }

    #[tokio::test]
    async fn test_no_matches_is_success() {
        let dir = fixture();
        let tool = LocalFileSearchTool::new(Some(dir.path().to_path_buf()));
        let result = tool.execute(json!({"pattern": "*.rs"})).await;
        assert!(result.success);
        assert!(result.content.starts_with("No files found matching pattern '*.rs'"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_failure() {
        let dir = fixture();
        let tool = LocalFileSearchTool::new(Some(dir.path().to_path_buf()));
        let result = tool
            .execute(json!({"pattern": "*", "directory": "nope"}))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap_or_default().starts_with("Directory does not exist"));
    }
}
