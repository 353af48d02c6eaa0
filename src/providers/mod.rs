//! External capabilities consumed by the workflow.
//!
//! The orchestrator treats search engines, the page reader, the LLM and
//! the embedding model as opaque capabilities behind the traits below.
//! Concrete clients live in the submodules; tests plug in fakes.
//!
//! - [`SearchProvider`]: `execute(query, num_results) -> items`
//! - [`Scraper`]: `fetch(url) -> content blocks`
//! - [`Embedder`]: batch text embeddings
//!
//! The text model capability lives in [`crate::llm`].

pub mod cache;
pub mod embeddings;
pub mod exa;
pub mod rate_limit;
pub mod registry;
pub mod scraper;
pub mod tavily;

pub use cache::ResultCache;
pub use rate_limit::{RateLimit, SlidingWindowLimiter};
pub use registry::ProviderRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One hit returned by a search provider. `url` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub url: String,
    pub title: String,
    /// Snippet or raw content returned with the hit.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f32,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
}

impl SearchResultItem {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: String::new(),
            score: 0.0,
            provider: provider.into(),
            author: None,
            published_date: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

/// A pluggable web search backend.
///
/// Implementations return `Ok(vec![])` for "no results" and reserve
/// errors for transport-level failures.
#[async_trait]
pub trait SearchProvider: Send + Sync + std::fmt::Debug {
    /// Stable name, used as the cache and rate-limit key.
    fn name(&self) -> &str;

    async fn execute(&self, query: &str, num_results: usize)
    -> anyhow::Result<Vec<SearchResultItem>>;
}

/// Text extracted from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub content: Vec<String>,
    #[serde(default)]
    pub error: bool,
}

/// Fetches and extracts the readable text of a URL.
#[async_trait]
pub trait Scraper: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, url: &str) -> anyhow::Result<ScrapedContent>;
}

/// Produces dense vectors for relevance scoring.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    async fn embed(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Lowercases and collapses whitespace so equivalent queries share a cache entry.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
