//! Text model capability used for query enhancement and summarization.
//!
//! The workflow only needs "text in, text out", optionally streamed. The
//! [`TextModel`] trait captures that; [`ChatCompletionsClient`] implements
//! it against any OpenAI-compatible `/v1/chat/completions` endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use search_orchestrator::llm::{ChatCompletionsClient, CompletionRequest, TextModel};
//!
//! let client = ChatCompletionsClient::new(settings);
//! let answer = client
//!     .complete(CompletionRequest::new("You are terse.", "Define RAG."))
//!     .await?;
//! ```

pub mod chat_completions;
pub mod provider;

pub use chat_completions::ChatCompletionsClient;
pub use provider::Provider;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o-mini`).
    pub model: String,
    /// Provider type (auto-detected from `base_url`).
    pub provider: Provider,
}

/// One completion call: a system instruction and a user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    /// Ask the provider for a JSON object response.
    pub json: bool,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            json: false,
            temperature: None,
        }
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Stream of text deltas.
pub type TextStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Opaque text-in/text-out model.
#[async_trait]
pub trait TextModel: Send + Sync + std::fmt::Debug {
    /// Streams the answer as text deltas.
    async fn stream(&self, request: CompletionRequest) -> anyhow::Result<TextStream>;

    /// Collects the whole answer.
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String> {
        let mut stream = self.stream(request).await?;
        let mut content = String::new();
        while let Some(delta) = stream.next().await {
            content.push_str(&delta?);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl TextModel for Echo {
        async fn stream(&self, request: CompletionRequest) -> anyhow::Result<TextStream> {
            let parts: Vec<anyhow::Result<String>> = request
                .prompt
                .split(' ')
                .map(|w| Ok(format!("{w} ")))
                .collect();
            Ok(Box::pin(futures::stream::iter(parts)))
        }
    }

    #[tokio::test]
    async fn test_complete_collects_deltas() {
        let out = Echo
            .complete(CompletionRequest::new("sys", "a b c"))
            .await
            .unwrap();
        assert_eq!(out, "a b c ");
    }

    #[test]
    fn test_request_builders() {
        let req = CompletionRequest::new("s", "p").json().with_temperature(0.2);
        assert!(req.json);
        assert_eq!(req.temperature, Some(0.2));
    }
}
