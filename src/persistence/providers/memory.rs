//! In-process store for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};
use crate::events::ProgressEvent;
use crate::persistence::{
    ProgressLog, ResultStore, ResumedRecord, SearchRecord, SuspendRecord, SuspendStore,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Records per run, oldest first.
    suspends: RwLock<HashMap<String, Vec<SuspendRecord>>>,
    events: RwLock<HashMap<String, Vec<ProgressEvent>>>,
    results: RwLock<HashMap<String, SearchRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuspendStore for MemoryStore {
    async fn save(
        &self,
        run_id: &str,
        owner_id: Option<&str>,
        step_id: &str,
        snapshot: serde_json::Value,
        suspend_payload: serde_json::Value,
    ) -> WorkflowResult<String> {
        let mut suspends = self.suspends.write().await;
        let records = suspends.entry(run_id.to_string()).or_default();
        if records.iter().any(|r| r.suspended) {
            return Err(WorkflowError::Conflict(format!(
                "run {run_id} already has an active suspension"
            )));
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        records.push(SuspendRecord {
            id: id.clone(),
            run_id: run_id.to_string(),
            owner_id: owner_id.map(ToString::to_string),
            step_id: step_id.to_string(),
            suspend_payload,
            resume_payload: None,
            snapshot,
            suspended: true,
            resume_error: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn resume(
        &self,
        run_id: &str,
        resume_payload: serde_json::Value,
    ) -> WorkflowResult<ResumedRecord> {
        let mut suspends = self.suspends.write().await;
        let records = suspends
            .get_mut(run_id)
            .filter(|records| !records.is_empty())
            .ok_or_else(|| WorkflowError::NotFound(format!("suspension for run {run_id}")))?;

        if let Some(active) = records.iter_mut().find(|r| r.suspended) {
            active.suspended = false;
            active.resume_payload = Some(resume_payload);
            active.resume_error = None;
            active.updated_at = Utc::now();
            return Ok(ResumedRecord {
                record: active.clone(),
                first_resume: true,
            });
        }

        let latest = records
            .last()
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(format!("suspension for run {run_id}")))?;
        Ok(ResumedRecord {
            record: latest,
            first_resume: false,
        })
    }

    async fn load_active(&self, run_id: &str) -> WorkflowResult<Option<SuspendRecord>> {
        let suspends = self.suspends.read().await;
        Ok(suspends
            .get(run_id)
            .and_then(|records| records.iter().find(|r| r.suspended).cloned()))
    }

    async fn mark_resume_error(&self, run_id: &str, message: &str) -> WorkflowResult<()> {
        let mut suspends = self.suspends.write().await;
        if let Some(active) = suspends
            .get_mut(run_id)
            .and_then(|records| records.iter_mut().find(|r| r.suspended))
        {
            active.resume_error = Some(message.to_string());
            active.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn discard(&self, run_id: &str) -> WorkflowResult<()> {
        let mut suspends = self.suspends.write().await;
        if let Some(active) = suspends
            .get_mut(run_id)
            .and_then(|records| records.iter_mut().find(|r| r.suspended))
        {
            active.suspended = false;
            active.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressLog for MemoryStore {
    async fn append(&self, event: &ProgressEvent) -> WorkflowResult<()> {
        let mut events = self.events.write().await;
        events
            .entry(event.run_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str, after: Option<u64>) -> WorkflowResult<Vec<ProgressEvent>> {
        let events = self.events.read().await;
        Ok(events
            .get(run_id)
            .map(|log| {
                log.iter()
                    .filter(|e| after.is_none_or(|after| e.seq > after))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last_seq(&self, run_id: &str) -> WorkflowResult<Option<u64>> {
        let events = self.events.read().await;
        Ok(events
            .get(run_id)
            .and_then(|log| log.iter().map(|e| e.seq).max()))
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save_result(&self, record: &SearchRecord) -> WorkflowResult<()> {
        self.results
            .write()
            .await
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn load_result(&self, run_id: &str) -> WorkflowResult<Option<SearchRecord>> {
        Ok(self.results.read().await.get(run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_second_active_save_conflicts() {
        let store = MemoryStore::new();
        store
            .save("r1", Some("u1"), "review", json!({}), json!({ "n": 1 }))
            .await
            .unwrap();

        let err = store
            .save("r1", Some("u1"), "review", json!({}), json!({ "n": 2 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict_error");

        // Other runs are unaffected.
        assert!(store.save("r2", None, "review", json!({}), json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_resume_is_idempotent() {
        let store = MemoryStore::new();
        store
            .save("r1", None, "review", json!({ "k": "v" }), json!({}))
            .await
            .unwrap();

        let first = store
            .resume("r1", json!({ "selectedIndices": [0, 2] }))
            .await
            .unwrap();
        assert!(first.first_resume);
        assert_eq!(first.record.snapshot, json!({ "k": "v" }));

        let second = store
            .resume("r1", json!({ "selectedIndices": [5] }))
            .await
            .unwrap();
        assert!(!second.first_resume);
        assert_eq!(
            second.record.resume_payload,
            Some(json!({ "selectedIndices": [0, 2] }))
        );
        assert!(store.load_active("r1").await.unwrap().is_none());
        assert_eq!(store.suspends.read().await["r1"].len(), 1);
    }

    #[tokio::test]
    async fn test_resume_unknown_run_is_not_found() {
        let store = MemoryStore::new();
        let err = store.resume("nope", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_resuspend_after_resume() {
        let store = MemoryStore::new();
        store.save("r1", None, "review", json!({}), json!({})).await.unwrap();
        store.resume("r1", json!({})).await.unwrap();
        store.save("r1", None, "review", json!({}), json!({})).await.unwrap();
        assert!(store.load_active("r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mark_error_and_discard() {
        let store = MemoryStore::new();
        store.save("r1", None, "review", json!({}), json!({})).await.unwrap();
        store.mark_resume_error("r1", "index 12 out of range").await.unwrap();
        let active = store.load_active("r1").await.unwrap().unwrap();
        assert_eq!(active.resume_error.as_deref(), Some("index 12 out of range"));

        store.discard("r1").await.unwrap();
        assert!(store.load_active("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_log_filters_by_seq() {
        let store = MemoryStore::new();
        for seq in 1..=4 {
            store
                .append(&ProgressEvent {
                    run_id: "r1".into(),
                    seq,
                    step: 0,
                    event_type: "tick".into(),
                    payload: json!({}),
                    error: None,
                    error_type: None,
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }
        let tail = store.load("r1", Some(2)).await.unwrap();
        assert_eq!(tail.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(store.last_seq("r1").await.unwrap(), Some(4));
        assert_eq!(store.last_seq("r2").await.unwrap(), None);
    }
}
