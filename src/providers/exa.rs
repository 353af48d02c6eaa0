//! Exa neural search API client.

use async_trait::async_trait;
use serde::Deserialize;

use super::{SearchProvider, SearchResultItem};

const DEFAULT_BASE_URL: &str = "https://api.exa.ai";

/// Characters of page text requested alongside each hit.
const CONTENT_CHARS: usize = 2000;

#[derive(Clone)]
pub struct ExaProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for ExaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExaProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ExaProvider {
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
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExaResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    published_date: Option<String>,
}

#[async_trait]
impl SearchProvider for ExaProvider {
    fn name(&self) -> &str {
        "exa"
    }

    async fn execute(
        &self,
        query: &str,
        num_results: usize,
    ) -> anyhow::Result<Vec<SearchResultItem>> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "query": query,
            "numResults": num_results,
            "contents": { "text": { "maxCharacters": CONTENT_CHARS } },
        });

        let response: ExaResponse = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
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
                title: r.title.unwrap_or_else(|| r.url.clone()),
                url: r.url,
                content: r.text.unwrap_or_default(),
                score: r.score.unwrap_or_default(),
                provider: "exa".to_string(),
                author: r.author.filter(|a| !a.trim().is_empty()),
                published_date: r.published_date,
            })
            .collect())
    }
}
