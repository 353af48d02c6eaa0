//! Tavily search API client.

use async_trait::async_trait;
use serde::Deserialize;

use super::{SearchProvider, SearchResultItem};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

#[derive(Clone)]
pub struct TavilyProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for TavilyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TavilyProvider {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    published_date: Option<String>,
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn execute(
        &self,
        query: &str,
        num_results: usize,
    ) -> anyhow::Result<Vec<SearchResultItem>> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "query": query,
            "max_results": num_results,
            "search_depth": "basic",
        });

        let response: TavilyResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .results
            .into_iter()
            .map(|r| SearchResultItem {
                url: r.url,
                title: r.title,
                content: r.content,
                score: r.score,
                provider: "tavily".to_string(),
                author: None,
                published_date: r.published_date,
            })
            .collect())
    }
}
