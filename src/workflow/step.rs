//! The unit of work the engine schedules.
//!
//! Every step declares the [`PayloadKind`] it consumes and produces. The
//! engine checks both sides of each call, so a mapping function that
//! hands the wrong payload to a step fails loudly with
//! `invalid_input_error` instead of surfacing as a missing field later.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::{EventStreamWriter, OrdinalStep};
use crate::providers::SearchResultItem;

/// Text read from one page, or an error marker if it could not be read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub content: Vec<String>,
    #[serde(default)]
    pub error: bool,
}

/// A piece of page text selected as relevant to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub url: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
}

/// Discriminant of [`StepPayload`], used for contract checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Query,
    Plan,
    BranchDecision,
    SearchRequest,
    SearchResults,
    SearchBatches,
    ReviewSelection,
    ScrapeRequest,
    Page,
    Pages,
    RagRequest,
    Chunks,
    SummaryRequest,
    Summary,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Data passed between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    Query {
        query: String,
    },
    Plan {
        original: String,
        enhanced: String,
        sub_questions: Vec<String>,
    },
    BranchDecision {
        arm: String,
    },
    SearchRequest {
        provider: String,
        query: String,
        num_results: usize,
    },
    SearchResults {
        query: String,
        items: Vec<SearchResultItem>,
    },
    SearchBatches {
        query: String,
        batches: Vec<Vec<SearchResultItem>>,
    },
    ReviewSelection {
        query: String,
        items: Vec<SearchResultItem>,
    },
    ScrapeRequest {
        url: String,
        title: String,
    },
    Page {
        page: PageContent,
    },
    Pages {
        pages: Vec<PageContent>,
    },
    RagRequest {
        query: String,
        sub_questions: Vec<String>,
        pages: Vec<PageContent>,
    },
    Chunks {
        chunks: Vec<RankedChunk>,
    },
    SummaryRequest {
        query: String,
        sources: Vec<Source>,
        context: Vec<String>,
    },
    Summary {
        summary: String,
        sources: Vec<Source>,
    },
}

impl StepPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Query { .. } => PayloadKind::Query,
            Self::Plan { .. } => PayloadKind::Plan,
            Self::BranchDecision { .. } => PayloadKind::BranchDecision,
            Self::SearchRequest { .. } => PayloadKind::SearchRequest,
            Self::SearchResults { .. } => PayloadKind::SearchResults,
            Self::SearchBatches { .. } => PayloadKind::SearchBatches,
            Self::ReviewSelection { .. } => PayloadKind::ReviewSelection,
            Self::ScrapeRequest { .. } => PayloadKind::ScrapeRequest,
            Self::Page { .. } => PayloadKind::Page,
            Self::Pages { .. } => PayloadKind::Pages,
            Self::RagRequest { .. } => PayloadKind::RagRequest,
            Self::Chunks { .. } => PayloadKind::Chunks,
            Self::SummaryRequest { .. } => PayloadKind::SummaryRequest,
            Self::Summary { .. } => PayloadKind::Summary,
        }
    }

    /// Fails with `invalid_input_error` unless the payload is of `expected` kind.
    pub fn expect_kind(&self, step: &str, expected: PayloadKind) -> WorkflowResult<()> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(WorkflowError::invalid_input(
                step,
                format!("expected {expected} payload, got {}", self.kind()),
            ))
        }
    }
}

/// What a step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(StepPayload),
    /// The step needs external input. The value is shown to the human.
    Suspend(serde_json::Value),
}

/// Explicit, per-run state handed to every step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    pub config: Arc<WorkflowConfig>,
    pub events: EventStreamWriter,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Step: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn ordinal(&self) -> OrdinalStep {
        OrdinalStep::for_step_id(self.id())
    }

    fn input_kind(&self) -> PayloadKind;

    fn output_kind(&self) -> PayloadKind;

    /// Structural check run by the engine before `execute`.
    fn validate_input(&self, input: &StepPayload) -> WorkflowResult<()> {
        input.expect_kind(self.id(), self.input_kind())
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext)
    -> WorkflowResult<StepOutcome>;

    /// Stand-in output used when `execute` fails and the run can go on
    /// without this step. `None` means there is nothing useful to offer.
    fn degraded(&self, _input: &StepPayload, _error: &WorkflowError) -> Option<StepPayload> {
        None
    }

    /// Turns the human's answer into this step's output after a suspension.
    fn resume(
        &self,
        _input: &StepPayload,
        _resume_input: serde_json::Value,
    ) -> WorkflowResult<StepPayload> {
        Err(WorkflowError::invalid_input(
            self.id(),
            "step does not accept resume input",
        ))
    }
}
