//! Durable state the orchestrator needs to outlive a process: suspend
//! checkpoints, the progress event log and final search records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{PersistenceConfig, PersistenceProvider};
use crate::error::WorkflowResult;
use crate::events::ProgressEvent;

pub mod providers;

/// Checkpoint of a run waiting on human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendRecord {
    pub id: String,
    pub run_id: String,
    pub owner_id: Option<String>,
    pub step_id: String,
    /// Shown to the human.
    pub suspend_payload: serde_json::Value,
    /// Supplied back by the human.
    pub resume_payload: Option<serde_json::Value>,
    /// Serialized run: query, owner, creation time and step results.
    pub snapshot: serde_json::Value,
    pub suspended: bool,
    pub resume_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResumedRecord {
    pub record: SuspendRecord,
    /// False when the record had already been resumed; `record.resume_payload`
    /// is then the payload stored the first time.
    pub first_resume: bool,
}

/// Final record persisted when a run completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecord {
    pub run_id: String,
    pub enhanced_query: String,
    pub sources: Vec<String>,
    pub summary: String,
    pub completed: bool,
    /// `deep` or `standard`.
    pub search_approach: String,
}

#[async_trait]
pub trait SuspendStore: Send + Sync + std::fmt::Debug {
    /// Creates the run's active record. Fails with `Conflict` if one exists.
    async fn save(
        &self,
        run_id: &str,
        owner_id: Option<&str>,
        step_id: &str,
        snapshot: serde_json::Value,
        suspend_payload: serde_json::Value,
    ) -> WorkflowResult<String>;

    /// Clears the active flag and stores the payload. Repeating the call
    /// is a no-op that returns the first payload.
    async fn resume(
        &self,
        run_id: &str,
        resume_payload: serde_json::Value,
    ) -> WorkflowResult<ResumedRecord>;

    async fn load_active(&self, run_id: &str) -> WorkflowResult<Option<SuspendRecord>>;

    /// Notes a rejected resume attempt on the active record.
    async fn mark_resume_error(&self, run_id: &str, message: &str) -> WorkflowResult<()>;

    /// Deactivates the run's active record without a resume payload.
    async fn discard(&self, run_id: &str) -> WorkflowResult<()>;
}

/// Append-only event log backing replay and polling.
#[async_trait]
pub trait ProgressLog: Send + Sync + std::fmt::Debug {
    async fn append(&self, event: &ProgressEvent) -> WorkflowResult<()>;

    /// Events with `seq > after`, in sequence order.
    async fn load(&self, run_id: &str, after: Option<u64>) -> WorkflowResult<Vec<ProgressEvent>>;

    async fn last_seq(&self, run_id: &str) -> WorkflowResult<Option<u64>>;
}

#[async_trait]
pub trait ResultStore: Send + Sync + std::fmt::Debug {
    async fn save_result(&self, record: &SearchRecord) -> WorkflowResult<()>;

    async fn load_result(&self, run_id: &str) -> WorkflowResult<Option<SearchRecord>>;
}

/// The three stores, usually backed by one provider.
#[derive(Debug, Clone)]
pub struct Stores {
    pub suspend: Arc<dyn SuspendStore>,
    pub progress: Arc<dyn ProgressLog>,
    pub results: Arc<dyn ResultStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(providers::memory::MemoryStore::new());
        Self {
            suspend: Arc::clone(&store) as Arc<dyn SuspendStore>,
            progress: Arc::clone(&store) as Arc<dyn ProgressLog>,
            results: store,
        }
    }

    pub async fn from_config(config: &PersistenceConfig) -> anyhow::Result<Self> {
        match config.provider {
            PersistenceProvider::Memory => Ok(Self::memory()),
            PersistenceProvider::Postgres => {
                let url = config.database_url.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("persistence.database_url is required for postgres")
                })?;
                let store = Arc::new(providers::postgres::PostgresStore::new(url).await?);
                Ok(Self {
                    suspend: Arc::clone(&store) as Arc<dyn SuspendStore>,
                    progress: Arc::clone(&store) as Arc<dyn ProgressLog>,
                    results: store,
                })
            }
        }
    }
}
