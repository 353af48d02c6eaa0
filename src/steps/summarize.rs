use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use super::unexpected;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::OrdinalStep;
use crate::llm::{CompletionRequest, TextModel};
use crate::workflow::{PayloadKind, Source, Step, StepContext, StepOutcome, StepPayload};

const SYSTEM_PROMPT: &str = "You answer research questions using only the provided context. \
Write a clear, well organised answer in Markdown. Cite sources inline as [n] using the \
numbered source list. If the context does not answer the question, say so.";

/// Streams the final answer from the text model.
#[derive(Debug)]
pub struct SummarizeStep {
    model: Arc<dyn TextModel>,
}

impl SummarizeStep {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }
}

fn build_prompt(query: &str, sources: &[Source], context: &[String]) -> String {
    let mut prompt = format!("Question: {query}\n\nSources:\n");
    for (i, source) in sources.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {} ({})", i + 1, source.title, source.url);
    }
    prompt.push_str("\nContext:\n");
    if context.is_empty() {
        prompt.push_str("(no page content could be read)\n");
    }
    for block in context {
        let _ = writeln!(prompt, "---\n{block}");
    }
    prompt
}

#[async_trait]
impl Step for SummarizeStep {
    fn id(&self) -> &str {
        "summarize"
    }

    fn input_kind(&self) -> PayloadKind {
        PayloadKind::SummaryRequest
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::Summary
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext) -> WorkflowResult<StepOutcome> {
        let StepPayload::SummaryRequest {
            query,
            sources,
            context,
        } = input
        else {
            return Err(unexpected(self.id(), input));
        };

        ctx.events.send_manual_update(
            OrdinalStep::Summarize,
            "summarizing",
            json!({ "sources": sources.len(), "contextBlocks": context.len() }),
        );

        let request =
            CompletionRequest::new(SYSTEM_PROMPT, build_prompt(query, sources, context))
                .with_temperature(0.3);
        let mut stream = self
            .model
            .stream(request)
            .await
            .map_err(|e| WorkflowError::step_failed(self.id(), e))?;

        let mut summary = String::new();
        while let Some(delta) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }
            let delta = delta.map_err(|e| WorkflowError::step_failed(self.id(), e))?;
            if delta.is_empty() {
                continue;
            }
            summary.push_str(&delta);
            ctx.events.send_throttled(
                OrdinalStep::Summarize,
                "summary_delta",
                json!({ "text": summary }),
            );
        }

        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(WorkflowError::step_failed(self.id(), "model returned an empty answer"));
        }
        tracing::info!(run_id = %ctx.run_id, chars = summary.len(), "Summary generated");

        Ok(StepOutcome::Completed(StepPayload::Summary {
            summary,
            sources: sources.clone(),
        }))
    }
}
