use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use super::unexpected;
use crate::error::WorkflowResult;
use crate::events::OrdinalStep;
use crate::providers::SearchResultItem;
use crate::workflow::{PayloadKind, Step, StepContext, StepOutcome, StepPayload};

/// Merges per-provider batches into one list, keeping the first hit per URL.
#[derive(Debug, Default)]
pub struct AggregateStep;

/// Batches are consumed in order, so earlier providers win ties.
pub fn merge_batches(batches: &[Vec<SearchResultItem>]) -> Vec<SearchResultItem> {
    let mut seen = HashSet::new();
    batches
        .iter()
        .flatten()
        .filter(|item| seen.insert(item.url.as_str()))
        .cloned()
        .collect()
}

#[async_trait]
impl Step for AggregateStep {
    fn id(&self) -> &str {
        "aggregate"
    }

    fn input_kind(&self) -> PayloadKind {
        PayloadKind::SearchBatches
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::SearchResults
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext) -> WorkflowResult<StepOutcome> {
        let StepPayload::SearchBatches { query, batches } = input else {
            return Err(unexpected(self.id(), input));
        };

        let items = merge_batches(batches);
        let raw: usize = batches.iter().map(Vec::len).sum();
        tracing::info!(
            run_id = %ctx.run_id,
            batches = batches.len(),
            raw,
            unique = items.len(),
            "Search results aggregated"
        );

        ctx.events.send_manual_update(
            OrdinalStep::Search,
            "results_aggregated",
            json!({
                "count": items.len(),
                "duplicates": raw - items.len(),
                "results": items
                    .iter()
                    .map(|i| json!({ "title": i.title, "url": i.url, "provider": i.provider }))
                    .collect::<Vec<_>>(),
            }),
        );

        Ok(StepOutcome::Completed(StepPayload::SearchResults {
            query: query.clone(),
            items,
        }))
    }
}
