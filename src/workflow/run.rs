//! Run lifecycle and accumulated step results.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{Source, StepPayload};
use crate::error::{StepError, WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::{Cancelled, Completed, Created, Failed, Running, Suspended};
        matches!(
            (self, next),
            (Created, Running | Failed | Cancelled)
                | (Running, Completed | Failed | Cancelled | Suspended)
                | (Suspended, Running | Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    /// Waiting on human input.
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StepPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn running(step_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Running,
            payload: None,
            error: None,
            started_at: Some(started_at),
            finished_at: None,
        }
    }

    pub fn completed(
        step_id: impl Into<String>,
        payload: StepPayload,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Completed,
            payload: Some(payload),
            error: None,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    /// A failed result; `degraded` is the stand-in output downstream steps may use.
    pub fn failed(
        step_id: impl Into<String>,
        error: &WorkflowError,
        degraded: Option<StepPayload>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            payload: degraded,
            error: Some(error.to_step_error()),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    pub fn skipped(step_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            payload: None,
            error: None,
            started_at: Some(now),
            finished_at: Some(now),
        }
    }

    /// Awaiting human input. The payload keeps the step's own input for `resume`.
    pub fn suspended(
        step_id: impl Into<String>,
        input: StepPayload,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Suspended,
            payload: Some(input),
            error: None,
            started_at: Some(started_at),
            finished_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Read-only view of accumulated results, handed to input mappers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    results: BTreeMap<String, StepResult>,
}

impl RunState {
    pub fn get_step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    /// Payload of a step that completed.
    pub fn completed_payload(&self, step_id: &str) -> Option<&StepPayload> {
        self.results
            .get(step_id)
            .filter(|r| r.status == StepStatus::Completed)
            .and_then(|r| r.payload.as_ref())
    }

    /// Payload of a step that completed or failed with a degraded output.
    pub fn output(&self, step_id: &str) -> Option<&StepPayload> {
        self.results
            .get(step_id)
            .filter(|r| matches!(r.status, StepStatus::Completed | StepStatus::Failed))
            .and_then(|r| r.payload.as_ref())
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.results
            .get(step_id)
            .is_some_and(|r| r.status == StepStatus::Completed)
    }

    pub fn is_settled(&self, step_id: &str) -> bool {
        self.results.get(step_id).is_some_and(StepResult::is_settled)
    }

    pub fn results(&self) -> impl Iterator<Item = &StepResult> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Inserts unless a completed result already holds the slot.
    fn insert(&mut self, result: StepResult) -> bool {
        if self.is_completed(&result.step_id) {
            return false;
        }
        self.results.insert(result.step_id.clone(), result);
        true
    }
}

/// Final answer of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub summary: String,
    pub sources: Vec<Source>,
    pub search_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub query: String,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub state: RunState,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<RunOutcome>,
    pub error: Option<StepError>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, query: impl Into<String>, owner_id: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            query: query.into(),
            owner_id,
            created_at: Utc::now(),
            status: RunStatus::Created,
            state: RunState::default(),
            completed_at: None,
            outcome: None,
            error: None,
        }
    }

    /// Rebuilds a suspended run from its checkpoint.
    pub fn from_snapshot(snapshot: RunSnapshot) -> Self {
        Self {
            run_id: snapshot.run_id,
            query: snapshot.query,
            owner_id: snapshot.owner_id,
            created_at: snapshot.created_at,
            status: RunStatus::Suspended,
            state: snapshot.state,
            completed_at: None,
            outcome: None,
            error: None,
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            query: self.query.clone(),
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            state: self.state.clone(),
        }
    }
}

/// What a suspend record keeps to rebuild the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub query: String,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: RunState,
}

/// Shared, guarded cell around a [`Run`].
///
/// The engine task and the orchestrator both hold one. Every mutation
/// checks the lifecycle first: once the run is terminal all writes are
/// rejected, which is what stops an abandoned engine task from touching
/// a run that already timed out.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: Arc<str>,
    inner: Arc<Mutex<Run>>,
}

impl RunHandle {
    pub fn new(run: Run) -> Self {
        Self {
            run_id: Arc::from(run.run_id.as_str()),
            inner: Arc::new(Mutex::new(run)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Run> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Clone of the whole run.
    pub fn get(&self) -> Run {
        self.lock().clone()
    }

    pub fn state(&self) -> RunState {
        self.lock().state.clone()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.lock().snapshot()
    }

    pub fn get_step_result(&self, step_id: &str) -> Option<StepResult> {
        self.lock().state.get_step_result(step_id).cloned()
    }

    /// Appends a step result.
    ///
    /// Returns `Ok(false)` when a completed result already owns the step id
    /// and `Err(Conflict)` when the run is terminal.
    pub fn record(&self, result: StepResult) -> WorkflowResult<bool> {
        let mut run = self.lock();
        if run.status.is_terminal() {
            tracing::debug!(
                run_id = %run.run_id,
                step_id = %result.step_id,
                status = %run.status,
                "Discarding step result for terminal run"
            );
            return Err(WorkflowError::Conflict(format!(
                "run {} is already {}",
                run.run_id, run.status
            )));
        }
        let inserted = run.state.insert(result);
        Ok(inserted)
    }

    pub fn transition(&self, next: RunStatus) -> WorkflowResult<()> {
        let mut run = self.lock();
        Self::apply_transition(&mut run, next)
    }

    fn apply_transition(run: &mut Run, next: RunStatus) -> WorkflowResult<()> {
        if !run.status.can_transition_to(next) {
            return Err(WorkflowError::Conflict(format!(
                "run {} cannot move from {} to {}",
                run.run_id, run.status, next
            )));
        }
        tracing::debug!(run_id = %run.run_id, from = %run.status, to = %next, "Run transition");
        run.status = next;
        if next.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn complete(&self, outcome: RunOutcome) -> WorkflowResult<()> {
        let mut run = self.lock();
        Self::apply_transition(&mut run, RunStatus::Completed)?;
        run.outcome = Some(outcome);
        Ok(())
    }

    pub fn fail(&self, error: &WorkflowError) -> WorkflowResult<()> {
        let mut run = self.lock();
        Self::apply_transition(&mut run, RunStatus::Failed)?;
        run.error = Some(error.to_step_error());
        Ok(())
    }

    pub fn cancel(&self) -> WorkflowResult<()> {
        let mut run = self.lock();
        Self::apply_transition(&mut run, RunStatus::Cancelled)?;
        run.error = Some(WorkflowError::Cancelled.to_step_error());
        Ok(())
    }
}
