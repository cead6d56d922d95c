//! Tavily search adapter.
//!
//! Thin typed client for the Tavily REST API, plus the JSON schema the
//! completion provider registers for its `search` tool. The public option
//! and response types keep the camelCase shape the tool arguments use; the
//! REST payload is mapped to the API's snake_case fields internally.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use wab_core::{errors::Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTopic {
    General,
    News,
    Finance,
}

/// Search knobs, as the model supplies them in tool arguments.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TavilySearchOptions {
    pub search_depth: Option<SearchDepth>,
    pub topic: Option<SearchTopic>,
    pub days: Option<u32>,
    pub max_results: Option<u32>,
    pub include_answer: Option<bool>,
    pub include_images: Option<bool>,
    pub include_image_descriptions: Option<bool>,
    pub include_raw_content: Option<bool>,
    pub include_domains: Option<Vec<String>>,
    pub exclude_domains: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TavilySearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub raw_content: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TavilyImage {
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TavilySearchResponse {
    pub query: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub images: Vec<TavilyImage>,
    #[serde(default)]
    pub results: Vec<TavilySearchResult>,
    #[serde(default)]
    pub response_time: Option<f64>,
}

/// REST payload. Field names follow the Tavily API, not the tool arguments.
#[derive(Serialize)]
struct SearchRequestBody<'a> {
    api_key: &'a str,
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_depth: Option<SearchDepth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<SearchTopic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_answer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_image_descriptions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_raw_content: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_domains: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclude_domains: Option<&'a [String]>,
}

#[derive(Clone, Debug)]
pub struct TavilyClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl TavilyClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| Error::External(format!("tavily http client build: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            http,
        })
    }

    pub async fn search(
        &self,
        query: &str,
        options: &TavilySearchOptions,
    ) -> Result<TavilySearchResponse> {
        if query.trim().is_empty() {
            return Err(Error::Provider("search query cannot be empty".to_string()));
        }

        info!(query, "tavily search");
        let body = SearchRequestBody {
            api_key: &self.api_key,
            query,
            search_depth: options.search_depth,
            topic: options.topic,
            days: options.days,
            max_results: options.max_results,
            include_answer: options.include_answer,
            include_images: options.include_images,
            include_image_descriptions: options.include_image_descriptions,
            include_raw_content: options.include_raw_content,
            include_domains: options.include_domains.as_deref(),
            exclude_domains: options.exclude_domains.as_deref(),
        };

        let resp = self
            .http
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("tavily request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "tavily search failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: TavilySearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("tavily json error: {e}")))?;

        if parsed.results.is_empty() {
            warn!(query, "tavily returned no results");
        }

        Ok(parsed)
    }
}

/// JSON schema for the `search` tool's parameter object, matching the shape
/// of `{ query, options }` tool calls.
pub fn search_tool_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The main search query string to be used for searching information."
            },
            "options": {
                "type": "object",
                "description": "Configuration options for customizing the search parameters and result types.",
                "properties": {
                    "searchDepth": {
                        "type": "string",
                        "enum": ["basic", "advanced"],
                        "description": "Depth of the search: quick surface-level results or a more comprehensive exploration."
                    },
                    "topic": {
                        "type": "string",
                        "enum": ["general", "news", "finance"],
                        "description": "Search context or domain, to narrow results to a specific type of information."
                    },
                    "maxResults": {
                        "type": "number",
                        "description": "Maximum number of search results to return."
                    },
                    "includeAnswer": {
                        "type": "boolean",
                        "description": "When true, also generate a concise direct answer to the query."
                    },
                    "includeImages": {
                        "type": "boolean",
                        "description": "When true, include image results alongside text-based results."
                    },
                    "includeImageDescriptions": {
                        "type": "boolean",
                        "description": "When true, provide descriptive text for retrieved images."
                    },
                    "includeRawContent": {
                        "type": "boolean",
                        "description": "When true, return the full unprocessed content of search results."
                    },
                    "includeDomains": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Domains to restrict the search results to."
                    },
                    "excludeDomains": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Domains to exclude from the search results."
                    }
                }
            }
        },
        "required": ["query"]
    })
}
