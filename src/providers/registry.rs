//! Registry of search providers with their shared cache and rate limiter.

use std::sync::Arc;

use super::{ResultCache, SearchProvider, SearchResultItem, SlidingWindowLimiter};

/// Where a provider lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Live,
    /// Provider was over its window budget; no call was made.
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct ProviderLookup {
    pub items: Vec<SearchResultItem>,
    pub source: LookupSource,
}

/// Holds the pluggable search providers of one orchestrator instance.
///
/// Iteration order is registration order; aggregation relies on it to
/// break ties between providers.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn SearchProvider>>,
    limiter: Arc<SlidingWindowLimiter>,
    cache: Arc<ResultCache>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, cache: Arc<ResultCache>) -> Self {
        Self {
            providers: Vec::new(),
            limiter,
            cache,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Adds a provider; a provider with the same name replaces the old one in place.
    pub fn register(&mut self, provider: Arc<dyn SearchProvider>) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            *slot = provider;
        } else {
            self.providers.push(provider);
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SearchProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// Cache, then rate limiter, then the provider itself.
    ///
    /// Successful live results are written through to the cache. Transport
    /// errors are returned to the caller untouched.
    pub async fn lookup(
        &self,
        provider: &Arc<dyn SearchProvider>,
        query: &str,
        num_results: usize,
    ) -> anyhow::Result<ProviderLookup> {
        let name = provider.name();

        if let Some(items) = self.cache.get(name, query) {
            tracing::debug!(provider = %name, query = %query, "Provider cache hit");
            return Ok(ProviderLookup {
                items,
                source: LookupSource::Cache,
            });
        }

        if !self.limiter.try_acquire(name) {
            tracing::warn!(provider = %name, "Provider over rate limit, skipping");
            return Ok(ProviderLookup {
                items: Vec::new(),
                source: LookupSource::RateLimited,
            });
        }

        let items = provider.execute(query, num_results).await?;
        self.cache.insert(name, query, items.clone());

        tracing::debug!(
            provider = %name,
            result_count = items.len(),
            "Provider returned results"
        );

        Ok(ProviderLookup {
            items,
            source: LookupSource::Live,
        })
    }
}
