//! Concrete steps of the search pipeline.
//!
//! | id | ordinal | input -> output |
//! |---|---|---|
//! | `enhance` | 1 | `Query` -> `Plan` |
//! | `provider_search` | 2 | `SearchRequest` -> `SearchResults` |
//! | `aggregate` | 2 | `SearchBatches` -> `SearchResults` |
//! | `review` | 4 | `SearchResults` -> `ReviewSelection` (suspends) |
//! | `page_scrape` | 3 | `ScrapeRequest` -> `Page` |
//! | `rag` | 3 | `RagRequest` -> `Chunks` |
//! | `summarize` | 5 | `SummaryRequest` -> `Summary` |

pub mod aggregate;
pub mod enhance;
pub mod rag;
pub mod review;
pub mod scrape;
pub mod search;
pub mod summarize;

pub use aggregate::AggregateStep;
pub use enhance::EnhanceStep;
pub use rag::RagStep;
pub use review::ReviewStep;
pub use scrape::PageScrapeStep;
pub use search::ProviderSearchStep;
pub use summarize::SummarizeStep;

use crate::error::WorkflowError;
use crate::workflow::StepPayload;

/// Payload shape mismatch inside a step that already validated its input.
pub(crate) fn unexpected(step: &str, payload: &StepPayload) -> WorkflowError {
    WorkflowError::invalid_input(step, format!("unexpected {} payload", payload.kind()))
}
