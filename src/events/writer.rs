//! Ordered, throttled progress writer for one run segment.
//!
//! Each `send_*` call assigns the next sequence number under a lock and
//! hands the event to a single forwarder task, which appends it to the
//! progress log and then broadcasts it to live subscribers. Delivery
//! order therefore equals call order, whichever task made the call.
//!
//! Delivery problems never reach the caller: they are logged and dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    ERROR, OrdinalStep, ProgressEvent, REVIEW_REQUIRED, STEP_DEGRADED, WORKFLOW_COMPLETED,
    WORKFLOW_STARTED,
};
use crate::error::WorkflowError;
use crate::persistence::ProgressLog;

#[derive(Debug, Clone)]
struct Draft {
    step: u8,
    event_type: String,
    payload: serde_json::Value,
    error: Option<bool>,
    error_type: Option<String>,
}

impl Draft {
    fn new(step: OrdinalStep, event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            step: step.as_u8(),
            event_type: event_type.to_string(),
            payload,
            error: None,
            error_type: None,
        }
    }

    fn key(&self) -> (u8, &str) {
        (self.step, self.event_type.as_str())
    }
}

#[derive(Debug)]
struct WriterState {
    next_seq: u64,
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    /// Newest coalesced event of a throttled burst.
    pending: Option<Draft>,
    last_sent: HashMap<(u8, String), Instant>,
    /// A terminal or stream-ending event went out.
    finished: bool,
}

#[derive(Debug)]
struct Inner {
    run_id: String,
    throttle: Duration,
    state: Mutex<WriterState>,
    forwarder: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone)]
pub struct EventStreamWriter {
    inner: Arc<Inner>,
}

impl EventStreamWriter {
    /// Starts the forwarder task. `start_seq` continues the run's existing log.
    pub fn spawn(
        run_id: impl Into<String>,
        log: Arc<dyn ProgressLog>,
        live: broadcast::Sender<ProgressEvent>,
        start_seq: u64,
        throttle: Duration,
    ) -> Self {
        let run_id = run_id.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();

        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = log.append(&event).await {
                    let err = WorkflowError::Transport(err.to_string());
                    warn!(run_id = %event.run_id, seq = event.seq, error = %err, "Failed to persist progress event");
                }
                // No receivers just means nobody is watching live.
                let _ = live.send(event);
            }
        });

        Self {
            inner: Arc::new(Inner {
                run_id,
                throttle,
                state: Mutex::new(WriterState {
                    next_seq: start_seq,
                    tx: Some(tx),
                    pending: None,
                    last_sent: HashMap::new(),
                    finished: false,
                }),
                forwarder: tokio::sync::Mutex::new(Some(forwarder)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn is_closed(&self) -> bool {
        self.lock().tx.is_none()
    }

    pub fn send_workflow_started(&self, query: &str, run_id: &str) {
        self.push(
            Draft::new(
                OrdinalStep::Workflow,
                WORKFLOW_STARTED,
                json!({ "query": query, "runId": run_id }),
            ),
            false,
        );
    }

    /// Terminal. `result` carries summary, sources and metadata.
    pub fn send_workflow_completed(&self, run_id: &str, result: serde_json::Value) {
        debug!(run_id = %run_id, "Sending completion event");
        self.push(
            Draft::new(OrdinalStep::Summarize, WORKFLOW_COMPLETED, result),
            true,
        );
    }

    /// Terminal. No further events follow on this writer.
    pub fn send_error(&self, message: &str, kind: &str) {
        let mut draft = Draft::new(OrdinalStep::Workflow, ERROR, json!({ "message": message }));
        draft.error = Some(true);
        draft.error_type = Some(kind.to_string());
        self.push(draft, true);
    }

    pub fn send_manual_update(
        &self,
        ordinal: OrdinalStep,
        event_type: &str,
        payload: serde_json::Value,
    ) {
        self.push(Draft::new(ordinal, event_type, payload), false);
    }

    /// Non-fatal step failure notice.
    pub fn send_step_degraded(&self, ordinal: OrdinalStep, step_id: &str, err: &WorkflowError) {
        let mut draft = Draft::new(
            ordinal,
            STEP_DEGRADED,
            json!({ "stepId": step_id, "message": err.to_string() }),
        );
        draft.error = Some(true);
        draft.error_type = Some(err.kind().to_string());
        self.push(draft, false);
    }

    /// Human review requested. Ends the stream for this segment.
    pub fn send_suspended(&self, step_id: &str, payload: serde_json::Value) {
        self.push(
            Draft::new(
                OrdinalStep::Review,
                REVIEW_REQUIRED,
                json!({ "stepId": step_id, "data": payload }),
            ),
            true,
        );
    }

    /// Like `send_manual_update`, but events of the same `(step, type)`
    /// within the throttle interval are coalesced into the newest one.
    /// That newest event is delivered before any other event and on close.
    pub fn send_throttled(
        &self,
        ordinal: OrdinalStep,
        event_type: &str,
        payload: serde_json::Value,
    ) {
        let draft = Draft::new(ordinal, event_type, payload);
        let mut state = self.lock();
        if state.finished {
            return;
        }

        let now = Instant::now();
        let key = (draft.step, draft.event_type.clone());
        let recent = state
            .last_sent
            .get(&key)
            .is_some_and(|sent| now.duration_since(*sent) < self.inner.throttle);

        if recent {
            if let Some(pending) = state.pending.take()
                && pending.key() != draft.key()
            {
                self.emit(&mut state, pending);
            }
            state.pending = Some(draft);
        } else {
            if let Some(pending) = state.pending.take() {
                self.emit(&mut state, pending);
            }
            self.emit(&mut state, draft);
            state.last_sent.insert(key, now);
        }
    }

    fn push(&self, draft: Draft, ends_stream: bool) {
        let mut state = self.lock();
        if state.finished {
            debug!(
                run_id = %self.inner.run_id,
                event_type = %draft.event_type,
                "Dropping event after stream end"
            );
            return;
        }
        if let Some(pending) = state.pending.take() {
            self.emit(&mut state, pending);
        }
        self.emit(&mut state, draft);
        if ends_stream {
            state.finished = true;
        }
    }

    fn emit(&self, state: &mut WriterState, draft: Draft) {
        let Some(tx) = &state.tx else {
            debug!(run_id = %self.inner.run_id, event_type = %draft.event_type, "Writer closed, dropping event");
            return;
        };

        let event = ProgressEvent {
            run_id: self.inner.run_id.clone(),
            seq: state.next_seq,
            step: draft.step,
            event_type: draft.event_type,
            payload: draft.payload,
            error: draft.error,
            error_type: draft.error_type,
            timestamp: Utc::now(),
        };
        state.next_seq += 1;

        if let Err(err) = tx.send(event) {
            let err = WorkflowError::Transport(format!("forwarder gone: {err}"));
            warn!(run_id = %self.inner.run_id, error = %err, "Failed to queue progress event");
        }
    }

    /// Flushes any pending event and waits for the forwarder to drain.
    /// Safe to call more than once.
    pub async fn close(&self) {
        {
            let mut state = self.lock();
            if let Some(pending) = state.pending.take() {
                self.emit(&mut state, pending);
            }
            state.tx = None;
        }

        let forwarder = self.inner.forwarder.lock().await.take();
        if let Some(handle) = forwarder
            && let Err(err) = handle.await
        {
            warn!(run_id = %self.inner.run_id, error = %err, "Event forwarder task failed");
        }
    }
}
