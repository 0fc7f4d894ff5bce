use crate::config::SearchConfig;
use crate::mcp::registry::NativeTool;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

/// Web search backed by a Tavily-compatible HTTP API.
#[derive(Clone)]
pub struct WebSearchTool {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    default_max_results: u32,
}

impl std::fmt::Debug for WebSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keep the key OUT of logs.
        f.debug_struct("WebSearchTool")
            .field("endpoint", &self.endpoint.as_str())
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl WebSearchTool {
    pub fn from_config(cfg: &SearchConfig) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&cfg.endpoint)
            .with_context(|| format!("invalid search endpoint: {}", cfg.endpoint))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            api_key: cfg.api_key.clone().filter(|k| !k.trim().is_empty()),
            default_max_results: cfg.max_results,
        })
    }

    fn format_hits(query: &str, hits: &[SearchHit]) -> String {
        if hits.is_empty() {
            return format!("No results found for \"{query}\".");
        }
        hits.iter()
            .enumerate()
            .map(|(i, hit)| format!("{}. {}\n{}\n{}", i + 1, hit.title, hit.url, hit.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl NativeTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the top results with titles, URLs and snippets."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return."
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<CallToolResult> {
        let args: SearchArgs = serde_json::from_value(args)?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("web search is not configured: missing API key"))?;

        let body = SearchRequest {
            api_key,
            query: &args.query,
            max_results: args.max_results.unwrap_or(self.default_max_results),
        };

        tracing::debug!(query = %args.query, max_results = body.max_results, "Running web search");

        let response: SearchResponse = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .context("search request failed")?
            .error_for_status()
            .context("search API returned an error")?
            .json()
            .await
            .context("invalid search response")?;

        Ok(CallToolResult::success(vec![Content::text(
            Self::format_hits(&args.query, &response.results),
        )]))
    }
}
