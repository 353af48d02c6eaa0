//! Error taxonomy for the search workflow.
//!
//! Every failure the orchestrator can surface maps to one [`WorkflowError`]
//! variant, and every variant carries a stable `kind()` tag that clients
//! key off (e.g. `timeout_error`). Client code never sees raw internal
//! errors, only the message and the tag.

use serde::{Deserialize, Serialize};

/// Errors produced by steps, the engine, stores and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// A step's input (or output) failed its declared contract.
    #[error("invalid input for step '{step}': {message}")]
    InvalidInput { step: String, message: String },

    /// A search or scrape call could not produce data.
    #[error("provider '{provider}' degraded: {message}")]
    ProviderDegraded { provider: String, message: String },

    /// The run exceeded its wall-clock budget.
    #[error("search timed out after {budget_ms} ms")]
    Timeout { budget_ms: u64 },

    /// A single-active-record or single-active-run invariant was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A progress event could not be delivered.
    #[error("event transport failed: {0}")]
    Transport(String),

    /// A step on the critical path failed.
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    /// Required provider credentials are not configured.
    #[error("missing API keys: {0}")]
    MissingApiKeys(String),

    /// The run or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The run was cancelled by its owner.
    #[error("search was cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Stable, client-facing error tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input_error",
            Self::ProviderDegraded { .. } => "provider_degraded_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Conflict(_) => "conflict_error",
            Self::Transport(_) => "transport_error",
            Self::StepFailed { .. } => "workflow_execution_error",
            Self::MissingApiKeys(_) => "missing_api_keys",
            Self::NotFound(_) => "not_found",
            Self::Persistence(_) => "persistence_error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn invalid_input(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn step_failed(step: impl Into<String>, message: impl ToString) -> Self {
        Self::StepFailed {
            step: step.into(),
            message: message.to_string(),
        }
    }

    pub fn degraded(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::ProviderDegraded {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Wraps a store failure, keeping only its message.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Converts into the serializable form stored on step results.
    pub fn to_step_error(&self) -> StepError {
        StepError {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        Self::persistence(err)
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::persistence(err)
    }
}

/// Error attached to a failed step result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: String,
    pub message: String,
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
