use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::unexpected;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::OrdinalStep;
use crate::providers::Scraper;
use crate::workflow::{PageContent, PayloadKind, Step, StepContext, StepOutcome, StepPayload};

/// Reads one page. Run once per selected URL by the scrape fan-out.
#[derive(Debug)]
pub struct PageScrapeStep {
    scraper: Arc<dyn Scraper>,
}

impl PageScrapeStep {
    pub fn new(scraper: Arc<dyn Scraper>) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl Step for PageScrapeStep {
    fn id(&self) -> &str {
        "page_scrape"
    }

    fn input_kind(&self) -> PayloadKind {
        PayloadKind::ScrapeRequest
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::Page
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext) -> WorkflowResult<StepOutcome> {
        let StepPayload::ScrapeRequest { url, title } = input else {
            return Err(unexpected(self.id(), input));
        };

        let scraped = self
            .scraper
            .fetch(url)
            .await
            .map_err(|e| WorkflowError::degraded("scraper", format!("{url}: {e}")))?;

        let error = scraped.error || scraped.content.is_empty();
        tracing::debug!(
            run_id = %ctx.run_id,
            url = %url,
            blocks = scraped.content.len(),
            error,
            "Page read"
        );

        ctx.events.send_throttled(
            OrdinalStep::Read,
            "scrape_progress",
            json!({
                "url": url,
                "title": title,
                "blocks": scraped.content.len(),
                "error": error,
            }),
        );

        Ok(StepOutcome::Completed(StepPayload::Page {
            page: PageContent {
                url: url.clone(),
                title: title.clone(),
                content: scraped.content,
                error,
            },
        }))
    }

    fn degraded(&self, input: &StepPayload, _error: &WorkflowError) -> Option<StepPayload> {
        match input {
            StepPayload::ScrapeRequest { url, title } => Some(StepPayload::Page {
                page: PageContent {
                    url: url.clone(),
                    title: title.clone(),
                    content: Vec::new(),
                    error: true,
                },
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::providers::ScrapedContent;
    use crate::steps::test_support::{context, event_types};

    #[derive(Debug)]
    struct FixedScraper(Option<Vec<String>>);

    #[async_trait]
    impl Scraper for FixedScraper {
        async fn fetch(&self, _url: &str) -> anyhow::Result<ScrapedContent> {
            match &self.0 {
                Some(content) => Ok(ScrapedContent {
                    content: content.clone(),
                    error: false,
                }),
                None => anyhow::bail!("timed out"),
            }
        }
    }

    fn request() -> StepPayload {
        StepPayload::ScrapeRequest {
            url: "https://blog.rust-lang.org".into(),
            title: "Rust Blog".into(),
        }
    }

    #[tokio::test]
    async fn test_page_read() {
        let step = PageScrapeStep::new(Arc::new(FixedScraper(Some(vec![
            "Rust 2024 edition".into(),
        ]))));
        let (ctx, log) = context(WorkflowConfig::default());

        let out = step.execute(&request(), &ctx).await.unwrap();
        let StepOutcome::Completed(StepPayload::Page { page }) = out else {
            panic!("expected page");
        };
        assert_eq!(page.content, vec!["Rust 2024 edition"]);
        assert!(!page.error);
        assert_eq!(event_types(&ctx, &log).await, vec!["scrape_progress"]);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_error_page() {
        let step = PageScrapeStep::new(Arc::new(FixedScraper(None)));
        let (ctx, _log) = context(WorkflowConfig::default());

        let input = request();
        let err = step.execute(&input, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), "provider_degraded_error");

        let Some(StepPayload::Page { page }) = step.degraded(&input, &err) else {
            panic!("expected degraded page");
        };
        assert!(page.error);
        assert!(page.content.is_empty());
        assert_eq!(page.url, "https://blog.rust-lang.org");
    }
}
