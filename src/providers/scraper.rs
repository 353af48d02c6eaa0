//! Page reader client.
//!
//! Uses a reader-style endpoint (`{base_url}{target_url}`) that returns
//! the page as plain text or markdown, and splits it into paragraph
//! blocks.

use async_trait::async_trait;

use super::{ScrapedContent, Scraper};

const DEFAULT_BASE_URL: &str = "https://r.jina.ai/";

/// Blocks shorter than this are navigation noise.
const MIN_BLOCK_CHARS: usize = 40;

#[derive(Clone)]
pub struct ReaderScraper {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for ReaderScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderScraper")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

impl ReaderScraper {
    pub fn new(http: reqwest::Client, base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        }
    }
}

#[async_trait]
impl Scraper for ReaderScraper {
    async fn fetch(&self, url: &str) -> anyhow::Result<ScrapedContent> {
        let target = format!("{}{}", self.base_url, url);
        let mut rb = self.http.get(&target).header("Accept", "text/plain");
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }

        let text = rb.send().await?.error_for_status()?.text().await?;
        Ok(ScrapedContent {
            content: split_blocks(&text),
            error: false,
        })
    }
}

/// Splits reader output on blank lines, dropping short fragments.
pub fn split_blocks(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|block| block.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|block| block.chars().count() >= MIN_BLOCK_CHARS)
        .collect()
}
