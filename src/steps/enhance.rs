//! Query enhancement: rewrite the query for search and propose sub-questions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::unexpected;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::OrdinalStep;
use crate::llm::{CompletionRequest, TextModel};
use crate::workflow::{PayloadKind, Step, StepContext, StepOutcome, StepPayload};

const SYSTEM_PROMPT: &str = "You improve web search queries. Reply with a JSON object \
{\"enhancedQuery\": string, \"subQuestions\": string[]}. The enhanced query keeps the \
user's intent, adds missing context and removes filler. Sub-questions are short, \
independently searchable questions that together cover the topic.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnhancedAnswer {
    enhanced_query: String,
    #[serde(default)]
    sub_questions: Vec<String>,
}

#[derive(Debug)]
pub struct EnhanceStep {
    model: Arc<dyn TextModel>,
}

impl EnhanceStep {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }
}

/// Parses the model's answer. Anything that is not the expected JSON is
/// taken verbatim as the enhanced query.
fn parse_answer(answer: &str, original: &str, max_sub_questions: usize) -> (String, Vec<String>) {
    let trimmed = answer.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let (enhanced, subs) = match serde_json::from_str::<EnhancedAnswer>(body) {
        Ok(parsed) => (parsed.enhanced_query, parsed.sub_questions),
        Err(_) => (body.to_string(), Vec::new()),
    };

    let enhanced = enhanced.trim();
    let enhanced = if enhanced.is_empty() {
        original.to_string()
    } else {
        enhanced.to_string()
    };

    let subs = subs
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && *q != enhanced)
        .take(max_sub_questions)
        .collect();

    (enhanced, subs)
}

#[async_trait]
impl Step for EnhanceStep {
    fn id(&self) -> &str {
        "enhance"
    }

    fn input_kind(&self) -> PayloadKind {
        PayloadKind::Query
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::Plan
    }

    fn validate_input(&self, input: &StepPayload) -> WorkflowResult<()> {
        match input {
            StepPayload::Query { query } if query.trim().is_empty() => Err(
                WorkflowError::invalid_input(self.id(), "query must not be empty"),
            ),
            other => other.expect_kind(self.id(), self.input_kind()),
        }
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext) -> WorkflowResult<StepOutcome> {
        let StepPayload::Query { query } = input else {
            return Err(unexpected(self.id(), input));
        };

        let request = CompletionRequest::new(SYSTEM_PROMPT, query.as_str())
            .json()
            .with_temperature(0.2);
        let answer = self
            .model
            .complete(request)
            .await
            .map_err(|e| WorkflowError::step_failed(self.id(), e))?;

        let (enhanced, sub_questions) =
            parse_answer(&answer, query, ctx.config.max_sub_questions);
        tracing::info!(
            run_id = %ctx.run_id,
            enhanced = %enhanced,
            sub_questions = sub_questions.len(),
            "Query enhanced"
        );

        ctx.events.send_manual_update(
            OrdinalStep::Enhance,
            "query_enhanced",
            json!({
                "original": query,
                "enhanced": enhanced,
                "subQuestions": sub_questions,
            }),
        );

        Ok(StepOutcome::Completed(StepPayload::Plan {
            original: query.clone(),
            enhanced,
            sub_questions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::steps::test_support::{BrokenModel, CannedModel, context, event_types};

    #[test]
    fn test_parse_json_answer() {
        let answer = r#"{"enhancedQuery": "quantum computing basics", "subQuestions": ["what is a qubit", "", "how do quantum gates work", "x", "y"]}"#;
        let (enhanced, subs) = parse_answer(answer, "qc", 3);
        assert_eq!(enhanced, "quantum computing basics");
        assert_eq!(subs, vec!["what is a qubit", "how do quantum gates work", "x"]);
    }

    #[test]
    fn test_parse_fenced_json() {
        let answer = "```json\n{\"enhancedQuery\": \"rust ownership\"}\n```";
        let (enhanced, subs) = parse_answer(answer, "rust", 3);
        assert_eq!(enhanced, "rust ownership");
        assert!(subs.is_empty());
    }

    #[test]
    fn test_plain_text_taken_verbatim() {
        let (enhanced, subs) = parse_answer("  rust async runtimes  ", "rust", 3);
        assert_eq!(enhanced, "rust async runtimes");
        assert!(subs.is_empty());

        let (fallback, _) = parse_answer("   ", "original query", 3);
        assert_eq!(fallback, "original query");
    }

    #[tokio::test]
    async fn test_execute_emits_query_enhanced() {
        let step = EnhanceStep::new(Arc::new(CannedModel(
            r#"{"enhancedQuery": "what is quantum computing", "subQuestions": []}"#.into(),
        )));
        let (ctx, log) = context(WorkflowConfig::default());

        let out = step
            .execute(&StepPayload::Query { query: "quantum computing".into() }, &ctx)
            .await
            .unwrap();
        let StepOutcome::Completed(StepPayload::Plan { enhanced, original, .. }) = out else {
            panic!("expected plan");
        };
        assert_eq!(enhanced, "what is quantum computing");
        assert_eq!(original, "quantum computing");
        assert_eq!(event_types(&ctx, &log).await, vec!["query_enhanced"]);
    }

    #[tokio::test]
    async fn test_model_failure_is_step_failure() {
        let step = EnhanceStep::new(Arc::new(BrokenModel));
        let (ctx, _log) = context(WorkflowConfig::default());
        let err = step
            .execute(&StepPayload::Query { query: "q".into() }, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "workflow_execution_error");
    }

    #[test]
    fn test_empty_query_rejected() {
        let step = EnhanceStep::new(Arc::new(BrokenModel));
        let err = step
            .validate_input(&StepPayload::Query { query: "  ".into() })
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input_error");
        assert!(step.validate_input(&StepPayload::Pages { pages: vec![] }).is_err());
    }
}
