//! Human-in-the-loop review of the aggregated search results.
//!
//! The step never completes by itself: `execute` always suspends with the
//! candidate list, and the run continues only once `resume` turns the
//! reviewer's `selectedIndices` into a [`StepPayload::ReviewSelection`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::unexpected;
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::{PayloadKind, Step, StepContext, StepOutcome, StepPayload};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewAnswer {
    selected_indices: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct ReviewStep;

#[async_trait]
impl Step for ReviewStep {
    fn id(&self) -> &str {
        "review"
    }

    fn input_kind(&self) -> PayloadKind {
        PayloadKind::SearchResults
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::ReviewSelection
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext) -> WorkflowResult<StepOutcome> {
        let StepPayload::SearchResults { query, items } = input else {
            return Err(unexpected(self.id(), input));
        };

        let candidates: Vec<_> = items.iter().take(ctx.config.review_candidates).collect();
        tracing::info!(
            run_id = %ctx.run_id,
            candidates = candidates.len(),
            "Suspending for human review"
        );

        Ok(StepOutcome::Suspend(json!({
            "query": query,
            "searchResults": candidates,
        })))
    }

    fn resume(
        &self,
        input: &StepPayload,
        resume_input: serde_json::Value,
    ) -> WorkflowResult<StepPayload> {
        let StepPayload::SearchResults { query, items } = input else {
            return Err(unexpected(self.id(), input));
        };

        let answer: ReviewAnswer = serde_json::from_value(resume_input).map_err(|e| {
            WorkflowError::invalid_input(self.id(), format!("expected {{selectedIndices}}: {e}"))
        })?;

        let mut indices = answer.selected_indices;
        indices.sort_unstable();
        indices.dedup();

        // Indices refer to the full list; the reviewer may have seen fewer.
        if let Some(bad) = indices.iter().find(|&&i| i >= items.len()) {
            return Err(WorkflowError::invalid_input(
                self.id(),
                format!("selected index {bad} out of range (0..{})", items.len()),
            ));
        }

        Ok(StepPayload::ReviewSelection {
            query: query.clone(),
            items: indices.into_iter().map(|i| items[i].clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::steps::test_support::{context, items};

    fn results(n: usize) -> StepPayload {
        let urls: Vec<String> = (0..n).map(|i| format!("https://site{i}.dev")).collect();
        let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
        StepPayload::SearchResults {
            query: "rust".into(),
            items: items("tavily", &urls),
        }
    }

    #[tokio::test]
    async fn test_suspends_with_candidates() {
        let config = WorkflowConfig {
            review_candidates: 3,
            ..WorkflowConfig::default()
        };
        let (ctx, _log) = context(config);
        let out = ReviewStep.execute(&results(10), &ctx).await.unwrap();
        let StepOutcome::Suspend(payload) = out else {
            panic!("review must suspend");
        };
        assert_eq!(payload["query"], "rust");
        assert_eq!(payload["searchResults"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_resume_selects_in_index_order() {
        let out = ReviewStep
            .resume(&results(10), json!({ "selectedIndices": [2, 0, 2] }))
            .unwrap();
        let StepPayload::ReviewSelection { items, .. } = out else {
            panic!("expected selection");
        };
        let urls: Vec<_> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://site0.dev", "https://site2.dev"]);
    }

    #[test]
    fn test_resume_rejects_bad_input() {
        let err = ReviewStep
            .resume(&results(3), json!({ "selectedIndices": [5] }))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input_error");

        let err = ReviewStep
            .resume(&results(3), json!({ "pick": [0] }))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input_error");
    }
}
