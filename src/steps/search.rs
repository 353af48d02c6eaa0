//! One provider, one query.
//!
//! Fan-out nodes run this step once per (provider, query) pair. A failing
//! provider degrades to an empty result set so the other branches still
//! count toward the aggregate.

use async_trait::async_trait;
use serde_json::json;

use super::unexpected;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::OrdinalStep;
use crate::providers::ProviderRegistry;
use crate::providers::registry::LookupSource;
use crate::workflow::{PayloadKind, Step, StepContext, StepOutcome, StepPayload};

#[derive(Debug)]
pub struct ProviderSearchStep {
    registry: ProviderRegistry,
}

impl ProviderSearchStep {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Step for ProviderSearchStep {
    fn id(&self) -> &str {
        "provider_search"
    }

    fn input_kind(&self) -> PayloadKind {
        PayloadKind::SearchRequest
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::SearchResults
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext) -> WorkflowResult<StepOutcome> {
        let StepPayload::SearchRequest {
            provider,
            query,
            num_results,
        } = input
        else {
            return Err(unexpected(self.id(), input));
        };

        let search_provider = self.registry.get(provider).ok_or_else(|| {
            WorkflowError::invalid_input(self.id(), format!("unknown provider '{provider}'"))
        })?;

        let lookup = self
            .registry
            .lookup(&search_provider, query, *num_results)
            .await
            .map_err(|e| WorkflowError::degraded(provider.as_str(), e))?;

        if lookup.source == LookupSource::RateLimited {
            ctx.events.send_manual_update(
                OrdinalStep::Search,
                "provider_skipped",
                json!({ "provider": provider, "query": query, "reason": "rate_limited" }),
            );
        } else {
            ctx.events.send_manual_update(
                OrdinalStep::Search,
                "provider_results",
                json!({
                    "provider": provider,
                    "query": query,
                    "count": lookup.items.len(),
                    "cached": lookup.source == LookupSource::Cache,
                }),
            );
        }

        Ok(StepOutcome::Completed(StepPayload::SearchResults {
            query: query.clone(),
            items: lookup.items,
        }))
    }

    fn degraded(&self, input: &StepPayload, _error: &WorkflowError) -> Option<StepPayload> {
        match input {
            StepPayload::SearchRequest { query, .. } => Some(StepPayload::SearchResults {
                query: query.clone(),
                items: Vec::new(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::WorkflowConfig;
    use crate::providers::{RateLimit, ResultCache, SearchProvider, SlidingWindowLimiter};
    use crate::steps::test_support::{StaticProvider, context, event_types, items, registry};

    fn request(provider: &str) -> StepPayload {
        StepPayload::SearchRequest {
            provider: provider.into(),
            query: "rust async".into(),
            num_results: 5,
        }
    }

    #[tokio::test]
    async fn test_results_and_event() {
        let provider: Arc<dyn SearchProvider> = Arc::new(StaticProvider {
            name: "tavily",
            items: Some(items("tavily", &["https://a", "https://b"])),
        });
        let step = ProviderSearchStep::new(registry(vec![provider]));
        let (ctx, log) = context(WorkflowConfig::default());

        let out = step.execute(&request("tavily"), &ctx).await.unwrap();
        let StepOutcome::Completed(StepPayload::SearchResults { items, .. }) = out else {
            panic!("expected results");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(event_types(&ctx, &log).await, vec!["provider_results"]);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let provider: Arc<dyn SearchProvider> = Arc::new(StaticProvider {
            name: "exa",
            items: None,
        });
        let step = ProviderSearchStep::new(registry(vec![provider]));
        let (ctx, _log) = context(WorkflowConfig::default());

        let input = request("exa");
        let err = step.execute(&input, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), "provider_degraded_error");

        let Some(StepPayload::SearchResults { items, query }) = step.degraded(&input, &err) else {
            panic!("expected degraded results");
        };
        assert!(items.is_empty());
        assert_eq!(query, "rust async");
    }

    #[tokio::test]
    async fn test_rate_limited_provider_is_skipped() {
        let provider: Arc<dyn SearchProvider> = Arc::new(StaticProvider {
            name: "tavily",
            items: Some(items("tavily", &["https://a"])),
        });
        let registry = ProviderRegistry::new(
            Arc::new(SlidingWindowLimiter::new(RateLimit {
                max_requests: 0,
                window_secs: 60,
            })),
            Arc::new(ResultCache::new(std::time::Duration::from_secs(60))),
        )
        .with_provider(provider);
        let step = ProviderSearchStep::new(registry);
        let (ctx, log) = context(WorkflowConfig::default());

        let out = step.execute(&request("tavily"), &ctx).await.unwrap();
        let StepOutcome::Completed(StepPayload::SearchResults { items, .. }) = out else {
            panic!("expected results");
        };
        assert!(items.is_empty());
        assert_eq!(event_types(&ctx, &log).await, vec!["provider_skipped"]);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let step = ProviderSearchStep::new(registry(vec![]));
        let (ctx, _log) = context(WorkflowConfig::default());
        let err = step.execute(&request("bing"), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input_error");
    }
}
