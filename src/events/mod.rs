//! Client-facing progress events.
//!
//! Every event carries an ordinal step (0-5) that clients key their UI off,
//! independent of which internal step emitted it.

pub mod sse;
pub mod writer;

pub use sse::build_sse_response;
pub use writer::EventStreamWriter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const WORKFLOW_STARTED: &str = "workflow_started";
pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
pub const ERROR: &str = "error";
pub const REVIEW_REQUIRED: &str = "review_required";
pub const STEP_DEGRADED: &str = "step_degraded";

/// Stable progress classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrdinalStep {
    Workflow = 0,
    Enhance = 1,
    Search = 2,
    Read = 3,
    Review = 4,
    Summarize = 5,
}

impl OrdinalStep {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps internal step and node ids (including fan-out branch ids such
    /// as `deep_search.3`) to their ordinal.
    pub fn for_step_id(step_id: &str) -> Self {
        let base = step_id.split('.').next().unwrap_or(step_id);
        match base {
            "enhance" => Self::Enhance,
            "search_path" | "standard_search" | "deep_search" | "provider_search"
            | "aggregate" => Self::Search,
            "scrape" | "page_scrape" | "rag" => Self::Read,
            "review" => Self::Review,
            "summarize" => Self::Summarize,
            _ => Self::Workflow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub run_id: String,
    /// Monotonic per run, continues across suspend/resume.
    pub seq: u64,
    pub step: u8,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Completion or terminal error.
    pub fn is_terminal(&self) -> bool {
        self.event_type == WORKFLOW_COMPLETED || self.event_type == ERROR
    }

    /// Whether a live connection should end after this event.
    pub fn ends_stream(&self) -> bool {
        self.is_terminal() || self.event_type == REVIEW_REQUIRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_mapping() {
        assert_eq!(OrdinalStep::for_step_id("enhance").as_u8(), 1);
        assert_eq!(OrdinalStep::for_step_id("deep_search.4"), OrdinalStep::Search);
        assert_eq!(OrdinalStep::for_step_id("scrape.0"), OrdinalStep::Read);
        assert_eq!(OrdinalStep::for_step_id("review").as_u8(), 4);
        assert_eq!(OrdinalStep::for_step_id("summarize").as_u8(), 5);
        assert_eq!(OrdinalStep::for_step_id("input"), OrdinalStep::Workflow);
    }

    #[test]
    fn test_event_wire_format() {
        let event = ProgressEvent {
            run_id: "r1".into(),
            seq: 3,
            step: 0,
            event_type: ERROR.into(),
            payload: serde_json::json!({ "message": "boom" }),
            error: Some(true),
            error_type: Some("timeout_error".into()),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["runId"], "r1");
        assert_eq!(json["errorType"], "timeout_error");
        assert!(event.is_terminal());
        assert!(event.ends_stream());
    }
}
