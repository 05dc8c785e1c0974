//! Serper-backed web and scholarly search.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{ToolsConfig, string_list};
use crate::agent::tool::{Tool, ToolResult};

/// Request timeout for one search query.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Which Serper index to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEndpoint {
    /// General web search (`search` tool).
    Web,
    /// Academic publications (`google_scholar` tool).
    Scholar,
}

impl SearchEndpoint {
    const fn path(self) -> &'static str {
        match self {
            Self::Web => "search",
            Self::Scholar => "scholar",
        }
    }

    const fn tool_name(self) -> &'static str {
        match self {
            Self::Web => "search",
            Self::Scholar => "google_scholar",
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Self::Web => {
                "Perform Google web searches then returns a string of the top search results. Accepts multiple queries."
            }
            Self::Scholar => {
                "Leverage Google Scholar to retrieve relevant information from academic publications. Accepts multiple queries."
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    year: Option<Value>,
    #[serde(default)]
    cited_by: Option<u64>,
}

/// One search hit as returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRecord {
    title: String,
    url: String,
    snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cited_by: Option<u64>,
}

impl From<SerperHit> for SearchRecord {
    fn from(hit: SerperHit) -> Self {
        Self {
            title: hit.title,
            url: hit.link,
            snippet: hit.snippet,
            year: hit.year,
            cited_by: hit.cited_by,
        }
    }
}

/// Multi-query search over the Serper API.
///
/// Output is a JSON array of `{title, url, snippet}` records so that
/// citations can be lifted from it directly.
#[derive(Debug, Clone)]
pub struct SerperSearchTool {
    endpoint: SearchEndpoint,
    api_key: String,
    base_url: String,
    max_results: usize,
    client: reqwest::Client,
}

impl SerperSearchTool {
    /// Creates a search tool for `endpoint`.
    #[must_use]
    pub fn new(endpoint: SearchEndpoint, api_key: &str, config: &ToolsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build search HTTP client, using default");
                reqwest::Client::new()
            });
        Self {
            endpoint,
            api_key: api_key.to_string(),
            base_url: config.serper_url.trim_end_matches('/').to_string(),
            max_results: config.search_max_results,
            client,
        }
    }

    async fn search_one(&self, query: &str) -> Result<Vec<SearchRecord>, String> {
        let url = format!("{}/{}", self.base_url, self.endpoint.path());
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query, "num": self.max_results }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| format!("search failed for '{query}': {e}"))?;

        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid search response for '{query}': {e}"))?;

        Ok(body
            .organic
            .into_iter()
            .take(self.max_results)
            .map(SearchRecord::from)
            .collect())
    }
}

#[async_trait]
impl Tool for SerperSearchTool {
    fn name(&self) -> &str {
        self.endpoint.tool_name()
    }

    fn description(&self) -> &str {
        self.endpoint.description()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Array of query strings. Include multiple complementary search queries in a single call."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let queries = string_list(&args, "query");
        if queries.is_empty() {
            return ToolResult::failure("missing required argument 'query'");
        }

        let mut records = Vec::new();
        let mut errors = Vec::new();
        for query in &queries {
            info!(tool = self.name(), query = %query, "searching");
            match self.search_one(query).await {
                Ok(mut hits) => records.append(&mut hits),
                Err(e) => {
                    warn!(tool = self.name(), error = %e, "search query failed");
                    errors.push(e);
                }
            }
        }

        if records.is_empty() && !errors.is_empty() {
            return ToolResult::failure(errors.join("; "));
        }

        match serde_json::to_string(&records) {
            Ok(content) => ToolResult::ok(content).with_metadata(json!({
                "queries": queries,
                "total_results": records.len(),
                "errors": errors,
            })),
            Err(e) => ToolResult::failure(format!("failed to encode search results: {e}")),
        }
    }
}
