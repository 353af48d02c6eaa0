//! Owns the runs of one process.
//!
//! `OrchestrationSystem` creates runs, drives each execution segment on
//! its own tokio task under the configured timeout, and turns the
//! segment's outcome into exactly one terminal (or `review_required`)
//! progress event. Everything a run needs is injected at construction;
//! there is no global state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::{EventStreamWriter, OrdinalStep, ProgressEvent, REVIEW_REQUIRED};
use crate::llm::TextModel;
use crate::persistence::{SearchRecord, Stores, SuspendRecord};
use crate::pipeline::{self, PipelineDeps};
use crate::providers::{Embedder, ProviderRegistry, Scraper};
use crate::workflow::{
    ExecutionOutcome, Run, RunHandle, RunOutcome, RunSnapshot, RunStatus, StepContext,
    StepPayload, StepResult, WorkflowEngine,
};

const LIVE_BUFFER: usize = 256;

/// Finished runs kept in memory for status queries.
const RECENT_RUNS: usize = 1024;

/// Inbound search request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub run_id: Option<String>,
    pub owner_id: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeOutcome {
    pub run_id: String,
    /// False when the run had already been resumed; nothing new was started.
    pub first_resume: bool,
    pub resume_payload: Option<serde_json::Value>,
}

/// Client view of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub run_id: String,
    pub query: String,
    pub owner_id: Option<String>,
    pub status: RunStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub search_path: Option<String>,
    pub outcome: Option<RunOutcome>,
    pub error: Option<crate::error::StepError>,
    pub steps: Vec<StepResult>,
}

impl From<Run> for RunView {
    fn from(run: Run) -> Self {
        Self {
            search_path: pipeline::search_path(&run.state).map(|p| p.as_str().to_string()),
            steps: run.state.results().cloned().collect(),
            run_id: run.run_id,
            query: run.query,
            owner_id: run.owner_id,
            status: run.status,
            created_at: run.created_at,
            completed_at: run.completed_at,
            outcome: run.outcome,
            error: run.error,
        }
    }
}

/// External capabilities handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub registry: ProviderRegistry,
    /// `None` when no LLM endpoint is configured.
    pub model: Option<Arc<dyn TextModel>>,
    pub scraper: Arc<dyn Scraper>,
    pub embedder: Option<Arc<dyn Embedder>>,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    handle: RunHandle,
    live: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

/// Runs this process knows about. Executing and suspended runs are
/// active; a finished run keeps only its final state, and only the
/// newest [`RECENT_RUNS`] of those are remembered.
#[derive(Debug, Default)]
struct RunTable {
    active: HashMap<String, ActiveRun>,
    finished: HashMap<String, Run>,
    finished_order: VecDeque<String>,
}

impl RunTable {
    fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.active
            .get(run_id)
            .map(|active| active.handle.status())
            .or_else(|| self.finished.get(run_id).map(|run| run.status))
    }

    fn contains(&self, run_id: &str) -> bool {
        self.active.contains_key(run_id) || self.finished.contains_key(run_id)
    }

    /// Moves the run out of the active set if it has reached a terminal status.
    fn retire(&mut self, run_id: &str) {
        if !self
            .active
            .get(run_id)
            .is_some_and(|active| active.handle.is_terminal())
        {
            return;
        }
        let Some(active) = self.active.remove(run_id) else {
            return;
        };
        if self
            .finished
            .insert(run_id.to_string(), active.handle.get())
            .is_none()
        {
            self.finished_order.push_back(run_id.to_string());
        }
        while self.finished_order.len() > RECENT_RUNS {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
        debug!(run_id = %run_id, "Run retired");
    }
}

#[derive(Debug)]
enum Segment {
    Start(StepPayload),
    Resume {
        record: SuspendRecord,
        resume_input: serde_json::Value,
    },
}

/// Everything one execution segment needs, detached from the orchestrator.
#[derive(Debug)]
struct SegmentDriver {
    engine: WorkflowEngine,
    stores: Stores,
    config: Arc<WorkflowConfig>,
    handle: RunHandle,
    writer: EventStreamWriter,
    cancel: CancellationToken,
    runs: Arc<RwLock<RunTable>>,
}

#[derive(Debug, Clone)]
pub struct OrchestrationSystem {
    config: Arc<WorkflowConfig>,
    engine: Option<WorkflowEngine>,
    missing_keys: Vec<String>,
    stores: Stores,
    runs: Arc<RwLock<RunTable>>,
}

impl OrchestrationSystem {
    pub fn new(
        config: WorkflowConfig,
        capabilities: Capabilities,
        stores: Stores,
    ) -> WorkflowResult<Self> {
        let mut missing_keys = Vec::new();
        if capabilities.registry.is_empty() {
            missing_keys.push("TAVILY_API_KEY or EXA_API_KEY".to_string());
        }
        if capabilities.model.is_none() {
            missing_keys.push("LLM_BASE_URL and LLM_MODEL".to_string());
        }

        let engine = match capabilities.model {
            Some(model) => {
                let deps = PipelineDeps {
                    registry: capabilities.registry,
                    model,
                    scraper: capabilities.scraper,
                    embedder: capabilities.embedder,
                };
                let graph = pipeline::build_search_graph(&deps, &config)?;
                Some(WorkflowEngine::new(
                    Arc::new(graph),
                    Arc::clone(&stores.suspend),
                ))
            }
            None => None,
        };

        if !missing_keys.is_empty() {
            warn!(missing = ?missing_keys, "Searches will fail until credentials are configured");
        }

        Ok(Self {
            config: Arc::new(config),
            engine,
            missing_keys,
            stores,
            runs: Arc::new(RwLock::new(RunTable::default())),
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn writer(
        &self,
        run_id: &str,
        live: &broadcast::Sender<ProgressEvent>,
        start_seq: u64,
    ) -> EventStreamWriter {
        EventStreamWriter::spawn(
            run_id,
            Arc::clone(&self.stores.progress),
            live.clone(),
            start_seq,
            self.config.event_throttle(),
        )
    }

    async fn next_seq(&self, run_id: &str) -> WorkflowResult<u64> {
        Ok(self
            .stores
            .progress
            .last_seq(run_id)
            .await?
            .map_or(1, |seq| seq + 1))
    }

    /// Creates a run and starts executing it in the background.
    ///
    /// Returns the run id as soon as the run is registered. Progress is
    /// observed through [`Self::stream`], [`Self::subscribe`] or
    /// [`Self::progress`].
    #[instrument(skip(self, request), fields(run_id = tracing::field::Empty))]
    pub async fn start_search(&self, request: SearchRequest) -> WorkflowResult<String> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(WorkflowError::invalid_input(
                "search",
                "query must not be empty",
            ));
        }
        let run_id = request
            .run_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("run_id", run_id.as_str());

        if self.stores.suspend.load_active(&run_id).await?.is_some()
            || self.stores.progress.last_seq(&run_id).await?.is_some()
        {
            return Err(WorkflowError::Conflict(format!("run {run_id} already exists")));
        }

        let handle = RunHandle::new(Run::new(&run_id, &query, request.owner_id));
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        let cancel = CancellationToken::new();
        {
            let mut runs = self.runs.write().await;
            if runs.contains(&run_id) {
                return Err(WorkflowError::Conflict(format!("run {run_id} already exists")));
            }
            runs.active.insert(
                run_id.clone(),
                ActiveRun {
                    handle: handle.clone(),
                    live: live.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let writer = self.writer(&run_id, &live, 1);
        writer.send_workflow_started(&query, &run_id);
        info!(query = %query, "Search started");

        let Some(engine) = self.engine.clone().filter(|_| self.missing_keys.is_empty()) else {
            let err = WorkflowError::MissingApiKeys(self.missing_keys.join(", "));
            handle.transition(RunStatus::Running)?;
            handle.fail(&err)?;
            writer.send_error(&err.to_string(), err.kind());
            writer.close().await;
            self.runs.write().await.retire(&run_id);
            return Err(err);
        };

        let driver = SegmentDriver {
            engine,
            stores: self.stores.clone(),
            config: Arc::clone(&self.config),
            handle,
            writer,
            cancel,
            runs: Arc::clone(&self.runs),
        };
        tokio::spawn(driver.run(Segment::Start(StepPayload::Query { query })));

        Ok(run_id)
    }

    /// Feeds the human's answer to a suspended run.
    ///
    /// Repeating a resume is harmless: the second call changes nothing and
    /// reports the payload stored by the first.
    #[instrument(skip(self, resume_input))]
    pub async fn resume_search(
        &self,
        run_id: &str,
        resume_input: serde_json::Value,
    ) -> WorkflowResult<ResumeOutcome> {
        let Some(record) = self.stores.suspend.load_active(run_id).await? else {
            let status = self.runs.read().await.status(run_id);
            return match self.stores.suspend.resume(run_id, resume_input).await {
                // Discarded without an answer: the run ended while suspended.
                Ok(prior) if prior.record.resume_payload.is_none() => {
                    Err(WorkflowError::Conflict(format!(
                        "run {run_id} is not waiting for review"
                    )))
                }
                Ok(prior) => {
                    debug!(run_id = %run_id, "Repeated resume, returning stored payload");
                    Ok(ResumeOutcome {
                        run_id: run_id.to_string(),
                        first_resume: false,
                        resume_payload: prior.record.resume_payload,
                    })
                }
                Err(WorkflowError::NotFound(_)) if status.is_some_and(|s| !s.is_terminal()) => {
                    Err(WorkflowError::Conflict(format!(
                        "run {run_id} is not waiting for review"
                    )))
                }
                Err(err) => Err(err),
            };
        };

        if self.has_ended(run_id).await? {
            warn!(run_id = %run_id, "Discarding suspend record of a run that already ended");
            self.stores.suspend.discard(run_id).await?;
            return Err(WorkflowError::Conflict(format!(
                "run {run_id} has already ended"
            )));
        }

        let engine = self
            .engine
            .clone()
            .ok_or_else(|| WorkflowError::MissingApiKeys(self.missing_keys.join(", ")))?;

        let snapshot: RunSnapshot = serde_json::from_value(record.snapshot.clone())?;
        let suspended_input = snapshot
            .state
            .get_step_result(&record.step_id)
            .and_then(|r| r.payload.clone())
            .ok_or_else(|| {
                WorkflowError::invalid_input(&record.step_id, "snapshot has no suspended input")
            })?;

        if let Err(err) = engine.resume_output(&record, &suspended_input, resume_input.clone()) {
            warn!(run_id = %run_id, error = %err, "Rejected resume input");
            self.stores
                .suspend
                .mark_resume_error(run_id, &err.to_string())
                .await?;
            return Err(err);
        }

        let resumed = self.stores.suspend.resume(run_id, resume_input.clone()).await?;
        if !resumed.first_resume {
            return Ok(ResumeOutcome {
                run_id: run_id.to_string(),
                first_resume: false,
                resume_payload: resumed.record.resume_payload,
            });
        }

        let handle = RunHandle::new(Run::from_snapshot(snapshot));
        let cancel = CancellationToken::new();
        let live = {
            let mut runs = self.runs.write().await;
            let live = runs.active.get(run_id).map_or_else(
                || broadcast::channel(LIVE_BUFFER).0,
                |active| active.live.clone(),
            );
            runs.active.insert(
                run_id.to_string(),
                ActiveRun {
                    handle: handle.clone(),
                    live: live.clone(),
                    cancel: cancel.clone(),
                },
            );
            live
        };

        let writer = self.writer(run_id, &live, self.next_seq(run_id).await?);
        writer.send_manual_update(
            OrdinalStep::Review,
            "workflow_resumed",
            json!({ "stepId": record.step_id }),
        );
        info!(run_id = %run_id, step_id = %record.step_id, "Search resumed");

        let driver = SegmentDriver {
            engine,
            stores: self.stores.clone(),
            config: Arc::clone(&self.config),
            handle,
            writer,
            cancel,
            runs: Arc::clone(&self.runs),
        };
        tokio::spawn(driver.run(Segment::Resume {
            record: resumed.record,
            resume_input: resume_input.clone(),
        }));

        Ok(ResumeOutcome {
            run_id: run_id.to_string(),
            first_resume: true,
            resume_payload: Some(resume_input),
        })
    }

    /// Live events of a run that is currently known to this process.
    pub async fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.runs
            .read()
            .await
            .active
            .get(run_id)
            .map(|active| active.live.subscribe())
    }

    /// Number of runs currently executing or waiting for review.
    pub async fn active_runs(&self) -> usize {
        self.runs.read().await.active.len()
    }

    /// Whether the run has reached a terminal status, in memory or in its log.
    async fn has_ended(&self, run_id: &str) -> WorkflowResult<bool> {
        if self
            .runs
            .read()
            .await
            .status(run_id)
            .is_some_and(RunStatus::is_terminal)
        {
            return Ok(true);
        }
        let Some(last_seq) = self.stores.progress.last_seq(run_id).await? else {
            return Ok(false);
        };
        let tail = self
            .stores
            .progress
            .load(run_id, Some(last_seq.saturating_sub(1)))
            .await?;
        Ok(tail.last().is_some_and(ProgressEvent::is_terminal))
    }

    /// Logged events with `seq > after`.
    pub async fn progress(
        &self,
        run_id: &str,
        after: Option<u64>,
    ) -> WorkflowResult<Vec<ProgressEvent>> {
        let events = self.stores.progress.load(run_id, after).await?;
        if events.is_empty() && after.is_none() && !self.runs.read().await.contains(run_id) {
            return Err(WorkflowError::NotFound(format!("run {run_id}")));
        }
        Ok(events)
    }

    /// Replays the log after `after`, then follows live events.
    ///
    /// The stream ends after a terminal or `review_required` event, or
    /// immediately after the replay when the run is not executing.
    pub async fn stream(
        &self,
        run_id: &str,
        after: Option<u64>,
    ) -> WorkflowResult<impl Stream<Item = ProgressEvent> + Send + use<>> {
        // Subscribe before reading the log so nothing falls between the two.
        let active = self.runs.read().await.active.get(run_id).cloned();
        let live = active.as_ref().map(|a| a.live.subscribe());
        let replay = self.stores.progress.load(run_id, after).await?;
        if live.is_none() && replay.is_empty() && after.is_none() {
            return Err(WorkflowError::NotFound(format!("run {run_id}")));
        }
        // Read after the replay: a pause event is logged only once the run is suspended.
        let executing = active.is_some_and(|a| {
            matches!(a.handle.status(), RunStatus::Created | RunStatus::Running)
        });

        Ok(async_stream::stream! {
            let mut last_seq = after.unwrap_or(0);
            let mut finished = false;
            let mut paused = false;
            for event in replay {
                last_seq = event.seq;
                finished = event.is_terminal();
                paused = event.event_type == REVIEW_REQUIRED;
                yield event;
            }

            let Some(live) = live else { return };
            // A review pause in the replay only matters if the run has not resumed since.
            if finished || (paused && !executing) {
                return;
            }
            let mut live = BroadcastStream::new(live);
            while let Some(item) = live.next().await {
                match item {
                    Ok(event) if event.seq <= last_seq => {}
                    Ok(event) => {
                        last_seq = event.seq;
                        let done = event.ends_stream();
                        yield event;
                        if done {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Live subscriber lagged, events dropped");
                    }
                }
            }
        })
    }

    /// The active suspend record, if the run is waiting for review.
    pub async fn pending_review(&self, run_id: &str) -> WorkflowResult<Option<SuspendRecord>> {
        self.stores.suspend.load_active(run_id).await
    }

    pub async fn get_run(&self, run_id: &str) -> WorkflowResult<RunView> {
        {
            let runs = self.runs.read().await;
            if let Some(active) = runs.active.get(run_id) {
                return Ok(active.handle.get().into());
            }
            if let Some(run) = runs.finished.get(run_id) {
                return Ok(run.clone().into());
            }
        }
        // Suspended before a restart: rebuild from the checkpoint.
        if let Some(record) = self.stores.suspend.load_active(run_id).await? {
            let snapshot: RunSnapshot = serde_json::from_value(record.snapshot)?;
            return Ok(Run::from_snapshot(snapshot).into());
        }
        Err(WorkflowError::NotFound(format!("run {run_id}")))
    }

    /// Final record of a completed search.
    pub async fn get_result(&self, run_id: &str) -> WorkflowResult<Option<SearchRecord>> {
        self.stores.results.load_result(run_id).await
    }

    /// Stops a run that has not finished.
    ///
    /// An executing run observes the token and ends with a `cancelled`
    /// error event. A suspended run is cancelled here directly and its
    /// suspend record is discarded.
    #[instrument(skip(self))]
    pub async fn cancel(&self, run_id: &str) -> WorkflowResult<()> {
        let (active, finished) = {
            let runs = self.runs.read().await;
            (
                runs.active.get(run_id).cloned(),
                runs.finished.get(run_id).map(|run| run.status),
            )
        };
        if let Some(status) = finished {
            return Err(WorkflowError::Conflict(format!(
                "run {run_id} is already {status}"
            )));
        }

        let (handle, live) = match active {
            Some(active) => match active.handle.status() {
                RunStatus::Created | RunStatus::Running => {
                    info!("Cancelling running search");
                    active.cancel.cancel();
                    return Ok(());
                }
                RunStatus::Suspended => {
                    active.cancel.cancel();
                    (active.handle, active.live)
                }
                status => {
                    return Err(WorkflowError::Conflict(format!(
                        "run {run_id} is already {status}"
                    )));
                }
            },
            None => {
                let record = self.stores.suspend.load_active(run_id).await?.ok_or_else(|| {
                    WorkflowError::NotFound(format!("run {run_id}"))
                })?;
                let snapshot: RunSnapshot = serde_json::from_value(record.snapshot)?;
                let handle = RunHandle::new(Run::from_snapshot(snapshot));
                let (live, _) = broadcast::channel(LIVE_BUFFER);
                self.runs.write().await.active.insert(
                    run_id.to_string(),
                    ActiveRun {
                        handle: handle.clone(),
                        live: live.clone(),
                        cancel: CancellationToken::new(),
                    },
                );
                (handle, live)
            }
        };

        handle.cancel()?;
        self.stores.suspend.discard(run_id).await?;

        let writer = self.writer(run_id, &live, self.next_seq(run_id).await?);
        let err = WorkflowError::Cancelled;
        writer.send_error(&err.to_string(), err.kind());
        writer.close().await;
        self.runs.write().await.retire(run_id);
        info!("Suspended search cancelled");
        Ok(())
    }
}

impl SegmentDriver {
    /// Runs one segment to its end and publishes the outcome.
    async fn run(self, segment: Segment) {
        let run_id = self.handle.run_id().to_string();
        let budget = self.config.timeout();
        let ctx = StepContext {
            run_id: run_id.clone(),
            config: Arc::clone(&self.config),
            events: self.writer.clone(),
            cancel: self.cancel.clone(),
        };

        let engine = self.engine.clone();
        let run = self.handle.clone();
        // Not aborted on timeout: a late write is refused by the run's guard.
        let mut task = tokio::spawn(async move {
            match segment {
                Segment::Start(input) => engine.start(&run, input, &ctx).await,
                Segment::Resume {
                    record,
                    resume_input,
                } => engine.resume(&run, &record, resume_input, &ctx).await,
            }
        });

        let outcome = tokio::select! {
            joined = &mut task => joined.unwrap_or_else(|err| {
                Err(WorkflowError::step_failed("workflow", format!("engine task failed: {err}")))
            }),
            () = tokio::time::sleep(budget) => {
                #[allow(clippy::cast_possible_truncation)]
                let budget_ms = budget.as_millis() as u64;
                Err(WorkflowError::Timeout { budget_ms })
            }
            () = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
        };

        match outcome {
            Ok(ExecutionOutcome::Completed(payload)) => self.finish(&run_id, payload).await,
            Ok(ExecutionOutcome::Suspended {
                record_id,
                step_id,
                payload,
            }) => {
                info!(run_id = %run_id, %record_id, step_id = %step_id, "Waiting for review");
                self.writer.send_suspended(&step_id, payload);
            }
            Err(err) => self.abort(&run_id, err).await,
        }

        self.writer.close().await;
        self.runs.write().await.retire(&run_id);
    }

    async fn finish(&self, run_id: &str, payload: StepPayload) {
        let kind = payload.kind();
        let StepPayload::Summary { summary, sources } = payload else {
            let err =
                WorkflowError::step_failed(pipeline::SUMMARIZE, format!("unexpected {kind} output"));
            self.abort(run_id, err).await;
            return;
        };

        let state = self.handle.state();
        let search_path = pipeline::search_path(&state).map(|p| p.as_str().to_string());
        let enhanced = pipeline::enhanced_query(&state).unwrap_or_default().to_string();

        let outcome = RunOutcome {
            summary: summary.clone(),
            sources: sources.clone(),
            search_path: search_path.clone(),
        };
        if let Err(err) = self.handle.complete(outcome) {
            debug!(run_id = %run_id, error = %err, "Run ended before completion could be recorded");
            return;
        }

        self.writer.send_workflow_completed(
            run_id,
            json!({
                "summary": summary,
                "sources": sources,
                "metadata": {
                    "searchPath": search_path,
                    "enhancedQuery": enhanced,
                },
            }),
        );
        info!(run_id = %run_id, "Search completed");

        let record = SearchRecord {
            run_id: run_id.to_string(),
            enhanced_query: enhanced,
            sources: sources.into_iter().map(|s| s.url).collect(),
            summary,
            completed: true,
            search_approach: search_path.unwrap_or_default(),
        };
        if let Err(err) = self.stores.results.save_result(&record).await {
            warn!(run_id = %run_id, error = %err, "Failed to persist search result");
        }
    }

    async fn abort(&self, run_id: &str, err: WorkflowError) {
        let err = if self.cancel.is_cancelled() {
            WorkflowError::Cancelled
        } else {
            err
        };

        let transitioned = match err {
            WorkflowError::Cancelled => self.handle.cancel(),
            _ => self.handle.fail(&err),
        };
        if let Err(conflict) = transitioned {
            // Lost the race against a suspension that already checkpointed.
            if self.handle.status() == RunStatus::Suspended
                && let Ok(Some(record)) = self.stores.suspend.load_active(run_id).await
            {
                self.writer.send_suspended(&record.step_id, record.suspend_payload);
                return;
            }
            debug!(run_id = %run_id, error = %conflict, "Run already terminal");
            return;
        }

        if matches!(err, WorkflowError::Cancelled)
            && let Err(discard) = self.stores.suspend.discard(run_id).await
        {
            warn!(run_id = %run_id, error = %discard, "Failed to discard suspend record");
        }

        warn!(run_id = %run_id, error = %err, kind = err.kind(), "Search failed");
        self.writer.send_error(&err.to_string(), err.kind());
    }
}
