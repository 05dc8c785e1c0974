//! Citation extraction from tool output.
//!
//! Structured search results (a JSON array of records) are preferred. Any
//! other text is scanned for URLs, labelled from adjacent Markdown links or
//! the URL host.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use url::Url;

use super::message::{Source, SourceKind};

/// Tools whose output may reference external resources.
pub const SOURCE_TOOLS: &[&str] = &["search", "google_scholar", "visit"];

static URL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).ok());

static MARKDOWN_LINK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(\s*(https?://[^\s)]+)\s*\)").ok());

/// Returns `true` if output from `tool_name` should be scanned for sources.
#[must_use]
pub fn is_source_bearing(tool_name: &str) -> bool {
    SOURCE_TOOLS.contains(&tool_name)
}

/// Extracts sources from raw tool output.
///
/// A JSON array yields one [`SourceKind::SearchResult`] per record that has
/// both a `url`/`link` and a `title`/`name`; other JSON yields nothing.
/// Non-JSON text yields one [`SourceKind::WebLink`] per distinct URL.
#[must_use]
pub fn extract_sources(output: &str) -> Vec<Source> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(records)) => records.iter().filter_map(record_source).collect(),
        Ok(_) => Vec::new(),
        Err(_) => scan_links(trimmed),
    }
}

fn record_source(record: &Value) -> Option<Source> {
    let field = |a: &str, b: &str| {
        record
            .get(a)
            .or_else(|| record.get(b))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(Source {
        url: field("url", "link")?,
        title: field("title", "name")?,
        kind: SourceKind::SearchResult,
    })
}

fn scan_links(text: &str) -> Vec<Source> {
    let Some(url_re) = URL_PATTERN.as_ref() else {
        return Vec::new();
    };

    let labels: Vec<(String, String)> = MARKDOWN_LINK
        .as_ref()
        .map(|re| {
            re.captures_iter(text)
                .filter_map(|c| {
                    let label = c.get(1)?.as_str().trim().to_string();
                    Some((clean_url(c.get(2)?.as_str()), label))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut seen = HashSet::new();
    url_re
        .find_iter(text)
        .map(|m| clean_url(m.as_str()))
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .map(|url| {
            let title = labels
                .iter()
                .find(|(linked, _)| *linked == url)
                .map(|(_, label)| label.clone())
                .unwrap_or_else(|| host_title(&url));
            Source {
                url,
                title,
                kind: SourceKind::WebLink,
            }
        })
        .collect()
}

/// Strips trailing punctuation and an unbalanced closing parenthesis.
fn clean_url(raw: &str) -> String {
    let mut url = raw.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'']);
    while url.ends_with(')') && url.matches(')').count() > url.matches('(').count() {
        url = &url[..url.len() - 1];
        url = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'']);
    }
    url.to_string()
}

fn host_title(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| url.to_string())
}

/// Merges source lists, keeping the first occurrence of each URL.
#[must_use]
pub fn dedup_sources<'a>(sources: impl IntoIterator<Item = &'a Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.url.as_str()))
        .cloned()
        .collect()
}
