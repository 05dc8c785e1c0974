//! Page fetch and text extraction.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{info, warn};
use url::Url;

use super::{string_list, truncate_chars};
use crate::agent::tool::{Tool, ToolResult};

/// Characters of page text kept per URL.
const MAX_SUMMARY_CHARS: usize = 2000;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

static SCRIPT_STYLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<!--.*?-->").ok()
});
static TITLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").ok());
static ARTICLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*)</article>").ok());
static MAIN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<main\b[^>]*>(.*)</main>").ok());
static BODY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body>").ok());
static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]+>").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

/// Fetches pages and returns a short text summary of each.
#[derive(Debug, Clone)]
pub struct WebVisitTool {
    client: reqwest::Client,
}

impl WebVisitTool {
    /// Creates a visit tool with the given per-page timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build visit HTTP client, using default");
                reqwest::Client::new()
            });
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

/// Title and main text of an HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageText {
    title: String,
    content: String,
}

fn extract_page(html: &str) -> PageText {
    let cleaned = SCRIPT_STYLE
        .as_ref()
        .map_or_else(|| html.to_string(), |re| re.replace_all(html, " ").into_owned());

    let title = TITLE
        .as_ref()
        .and_then(|re| re.captures(&cleaned))
        .and_then(|c| c.get(1))
        .map(|m| to_text(m.as_str()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title".to_string());

    let region = [&ARTICLE, &MAIN, &BODY]
        .into_iter()
        .find_map(|re| {
            re.as_ref()?
                .captures(&cleaned)?
                .get(1)
                .map(|m| m.as_str().to_string())
        })
        .unwrap_or(cleaned);

    PageText {
        title,
        content: to_text(&region),
    }
}

fn to_text(html: &str) -> String {
    let stripped = TAG
        .as_ref()
        .map_or_else(|| html.to_string(), |re| re.replace_all(html, " ").into_owned());
    let decoded = decode_entities(&stripped);
    WHITESPACE
        .as_ref()
        .map_or_else(|| decoded.clone(), |re| re.replace_all(&decoded, " ").into_owned())
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl Tool for WebVisitTool {
    fn name(&self) -> &str {
        "visit"
    }

    fn description(&self) -> &str {
        "Visit webpage(s) and return the summary of the content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": ["string", "array"],
                    "items": {"type": "string"},
                    "minItems": 1,
                    "description": "The URL(s) of the webpage(s) to visit. Can be a single URL or an array of URLs."
                },
                "goal": {
                    "type": "string",
                    "description": "The goal of the visit for webpage(s)."
                }
            },
            "required": ["url", "goal"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let urls = string_list(&args, "url");
        if urls.is_empty() {
            return ToolResult::failure("missing required argument 'url'");
        }
        let goal = args.get("goal").and_then(Value::as_str).unwrap_or_default();

        let mut summaries = Vec::with_capacity(urls.len());
        let mut visited = 0usize;
        for url in &urls {
            info!(url = %url, goal = %goal, "visiting page");
            match self.fetch(url).await {
                Ok(html) => {
                    visited += 1;
                    let page = extract_page(&html);
                    summaries.push(format!(
                        "URL: {url}\nDomain: {}\nTitle: {}\n\nContent Summary (Goal: {goal}):\n{}\n\n---\n",
                        domain_of(url),
                        page.title,
                        truncate_chars(&page.content, MAX_SUMMARY_CHARS),
                    ));
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "failed to visit page");
                    summaries.push(format!(
                        "URL: {url}\nError: Failed to fetch page - {e}\n\n---\n"
                    ));
                }
            }
        }

        ToolResult::ok(summaries.join("\n")).with_metadata(json!({
            "urls": urls,
            "goal": goal,
            "pages_visited": visited,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::tools::test_server::serve_once;

    const PAGE: &str = r#"<html><head><title> Rust &amp; You </title>
        <style>body { color: red; }</style></head>
        <body><nav>menu</nav><script>alert("x")</script>
        <article><h1>Ownership</h1><p>Each value has an&nbsp;owner.</p></article>
        </body></html>"#;

    #[test]
    fn test_extract_page_prefers_article() {
        let page = extract_page(PAGE);
        assert_eq!(page.title, "Rust & You");
        assert_eq!(page.content, "Ownership Each value has an owner.");
    }

    #[test]
    fn test_extract_page_without_markup() {
        let page = extract_page("just text");
        assert_eq!(page.title, "No title");
        assert_eq!(page.content, "just text");
    }

    #[test]
    fn test_extract_page_falls_back_to_body() {
        let page = extract_page("<body><div>Hello <b>world</b></div><script>x()</script></body>");
        assert_eq!(page.content, "Hello world");
    }

    #[tokio::test]
    async fn test_visit_formats_summary() {
        let (url, server) = serve_once("200 OK", "text/html", PAGE).await;
        let page_url = format!("{url}/post");

        let result = WebVisitTool::new(Duration::from_secs(5))
            .execute(json!({"url": page_url, "goal": "learn ownership"}))
            .await;
        let _ = server.await;

        assert!(result.success);
        assert!(result.content.starts_with(&format!("URL: {page_url}\nDomain: 127.0.0.1")));
        assert!(result.content.contains("Title: Rust & You"));
        assert!(result.content.contains("Content Summary (Goal: learn ownership):"));
        assert!(!result.content.contains("alert"));
    }

    #[tokio::test]
    async fn test_visit_reports_fetch_errors_inline() {
        let (url, _server) = serve_once("404 Not Found", "text/html", "gone").await;
        let result = WebVisitTool::new(Duration::from_secs(5))
            .execute(json!({"url": [url], "goal": "g"}))
            .await;
        assert!(result.success);
        assert!(result.content.contains("Error: Failed to fetch page"));
        assert_eq!(
            result.metadata.as_ref().map(|m| m["pages_visited"].clone()),
            Some(json!(0))
        );
    }

    #[tokio::test]
    async fn test_visit_requires_url() {
        let result = WebVisitTool::new(Duration::from_secs(1))
            .execute(json!({"goal": "g"}))
            .await;
        assert!(!result.success);
    }
}
