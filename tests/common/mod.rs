//! Fakes for the external capabilities and helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use search_orchestrator::config::WorkflowConfig;
use search_orchestrator::events::ProgressEvent;
use search_orchestrator::llm::{CompletionRequest, TextModel, TextStream};
use search_orchestrator::orchestrator::{Capabilities, OrchestrationSystem};
use search_orchestrator::error::WorkflowResult;
use search_orchestrator::persistence::{ResumedRecord, Stores, SuspendRecord, SuspendStore};
use search_orchestrator::providers::{
    ProviderRegistry, RateLimit, ResultCache, ScrapedContent, Scraper, SearchProvider,
    SearchResultItem, SlidingWindowLimiter,
};

pub const SUMMARY: &str = "Quantum computers use qubits to explore many states at once [1].";

/// Plans with the query itself plus fixed sub-questions, then streams [`SUMMARY`].
#[derive(Debug, Default)]
pub struct FakeModel {
    pub sub_questions: Vec<String>,
}

#[async_trait]
impl TextModel for FakeModel {
    async fn stream(&self, request: CompletionRequest) -> anyhow::Result<TextStream> {
        let answer = if request.json {
            serde_json::json!({
                "enhancedQuery": request.prompt,
                "subQuestions": self.sub_questions,
            })
            .to_string()
        } else {
            SUMMARY.to_string()
        };
        let pieces: Vec<anyhow::Result<String>> = answer
            .split_inclusive(' ')
            .map(|p| Ok(p.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(pieces)))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Results(usize),
    Fail,
    /// Never answers.
    Hang,
}

/// Provider returning `https://{name}.example/{i}` hits and recording its queries.
#[derive(Debug)]
pub struct FakeProvider {
    pub name: &'static str,
    pub behavior: Behavior,
    pub queries: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

pub fn url(provider: &str, i: usize) -> String {
    format!("https://{provider}.example/{i}")
}

#[async_trait]
impl SearchProvider for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        query: &str,
        num_results: usize,
    ) -> anyhow::Result<Vec<SearchResultItem>> {
        self.queries.lock().unwrap().push(query.to_string());
        match self.behavior {
            Behavior::Results(n) => Ok((0..n.min(num_results))
                .map(|i| {
                    SearchResultItem::new(url(self.name, i), format!("{} hit {i}", self.name), self.name)
                        .with_content(format!("About quantum computing, part {i}"))
                })
                .collect()),
            Behavior::Fail => anyhow::bail!("connection reset by peer"),
            Behavior::Hang => futures::future::pending().await,
        }
    }
}

/// Reads every page as two blocks and records the URLs it was asked for.
#[derive(Debug, Default)]
pub struct FakeScraper {
    pub fetched: Mutex<Vec<String>>,
}

impl FakeScraper {
    pub fn fetched(&self) -> Vec<String> {
        let mut urls = self.fetched.lock().unwrap().clone();
        urls.sort();
        urls
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    async fn fetch(&self, url: &str) -> anyhow::Result<ScrapedContent> {
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(ScrapedContent {
            content: vec![
                format!("Quantum computing explained by {url}."),
                "Qubits hold superpositions of states.".to_string(),
            ],
            error: false,
        })
    }
}

pub fn test_config() -> WorkflowConfig {
    WorkflowConfig {
        timeout_ms: 10_000,
        results_per_provider: 10,
        max_scrape: 10,
        event_throttle_ms: 0,
        ..WorkflowConfig::default()
    }
}

pub struct Harness {
    pub system: OrchestrationSystem,
    pub scraper: Arc<FakeScraper>,
    pub stores: Stores,
}

/// Suspend store whose checkpoint writes take `delay`.
#[derive(Debug)]
pub struct SlowSuspendStore {
    pub inner: Arc<dyn SuspendStore>,
    pub delay: Duration,
}

#[async_trait]
impl SuspendStore for SlowSuspendStore {
    async fn save(
        &self,
        run_id: &str,
        owner_id: Option<&str>,
        step_id: &str,
        snapshot: serde_json::Value,
        suspend_payload: serde_json::Value,
    ) -> WorkflowResult<String> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .save(run_id, owner_id, step_id, snapshot, suspend_payload)
            .await
    }

    async fn resume(
        &self,
        run_id: &str,
        resume_payload: serde_json::Value,
    ) -> WorkflowResult<ResumedRecord> {
        self.inner.resume(run_id, resume_payload).await
    }

    async fn load_active(&self, run_id: &str) -> WorkflowResult<Option<SuspendRecord>> {
        self.inner.load_active(run_id).await
    }

    async fn mark_resume_error(&self, run_id: &str, message: &str) -> WorkflowResult<()> {
        self.inner.mark_resume_error(run_id, message).await
    }

    async fn discard(&self, run_id: &str) -> WorkflowResult<()> {
        self.inner.discard(run_id).await
    }
}

pub fn harness(
    config: WorkflowConfig,
    providers: Vec<Arc<dyn SearchProvider>>,
    model: Option<Arc<dyn TextModel>>,
) -> Harness {
    harness_with_stores(config, providers, model, Stores::memory())
}

pub fn harness_with_stores(
    config: WorkflowConfig,
    providers: Vec<Arc<dyn SearchProvider>>,
    model: Option<Arc<dyn TextModel>>,
    stores: Stores,
) -> Harness {
    let mut registry = ProviderRegistry::new(
        Arc::new(SlidingWindowLimiter::new(RateLimit::default())),
        Arc::new(ResultCache::new(Duration::from_secs(60))),
    );
    for provider in providers {
        registry.register(provider);
    }
    let scraper = Arc::new(FakeScraper::default());
    let capabilities = Capabilities {
        registry,
        model,
        scraper: Arc::clone(&scraper) as Arc<dyn Scraper>,
        embedder: None,
    };
    let system = OrchestrationSystem::new(config, capabilities, stores.clone()).unwrap();
    Harness {
        system,
        scraper,
        stores,
    }
}

pub fn model() -> Option<Arc<dyn TextModel>> {
    Some(Arc::new(FakeModel::default()))
}

/// Events of the current segment, up to and including the one that ends the stream.
pub async fn collect(system: &OrchestrationSystem, run_id: &str, after: Option<u64>) -> Vec<ProgressEvent> {
    let stream = system.stream(run_id, after).await.unwrap();
    tokio::time::timeout(Duration::from_secs(30), stream.collect::<Vec<_>>())
        .await
        .expect("stream did not end")
}

pub fn types(events: &[ProgressEvent]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}
