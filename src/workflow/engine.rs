//! Graph interpreter.
//!
//! The engine walks the graph from its entry node on every execution
//! segment. Nodes whose result is already completed or skipped are passed
//! over, so a resumed run continues right after the suspended step and a
//! recorded branch decision is followed rather than re-evaluated.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use super::graph::{NodeIdx, NodeKind, WorkflowGraph};
use super::run::{RunHandle, RunStatus, StepResult};
use super::step::{Step, StepContext, StepOutcome, StepPayload};
use crate::error::{WorkflowError, WorkflowResult};
use crate::persistence::{SuspendRecord, SuspendStore};

/// Id under which the initial input is recorded.
pub const INPUT_STEP_ID: &str = "input";

/// How an execution segment ended without error.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(StepPayload),
    Suspended {
        record_id: String,
        step_id: String,
        payload: serde_json::Value,
    },
}

#[derive(Debug)]
struct Suspension {
    record_id: String,
    step_id: String,
    payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    graph: Arc<WorkflowGraph>,
    suspend_store: Arc<dyn SuspendStore>,
}

impl WorkflowEngine {
    pub fn new(graph: Arc<WorkflowGraph>, suspend_store: Arc<dyn SuspendStore>) -> Self {
        Self {
            graph,
            suspend_store,
        }
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    fn entry_step(&self) -> WorkflowResult<&Arc<dyn Step>> {
        match &self.graph.node(self.graph.entry()).kind {
            NodeKind::Task { step, .. } => Ok(step),
            _ => Err(WorkflowError::invalid_input(
                "workflow_graph",
                "entry node must be a task",
            )),
        }
    }

    /// Checks `input` against the entry step's contract.
    pub fn validate_initial_input(&self, input: &StepPayload) -> WorkflowResult<()> {
        self.entry_step()?.validate_input(input)
    }

    /// Runs a fresh run from the entry node.
    pub async fn start(
        &self,
        run: &RunHandle,
        input: StepPayload,
        ctx: &StepContext,
    ) -> WorkflowResult<ExecutionOutcome> {
        self.validate_initial_input(&input)?;
        run.transition(RunStatus::Running)?;
        run.record(StepResult::completed(INPUT_STEP_ID, input, Utc::now()))?;
        info!(run_id = %run.run_id(), "Workflow started");
        self.execute(run, ctx).await
    }

    /// Computes the suspended step's output from the human's answer
    /// without touching the run.
    pub fn resume_output(
        &self,
        record: &SuspendRecord,
        snapshot_input: &StepPayload,
        resume_input: serde_json::Value,
    ) -> WorkflowResult<StepPayload> {
        let step = self.suspended_step(&record.step_id)?;
        let output = step.resume(snapshot_input, resume_input)?;
        output.expect_kind(step.id(), step.output_kind())?;
        Ok(output)
    }

    /// Continues a run rebuilt from `record`'s snapshot.
    ///
    /// `resume_input` becomes the suspended step's output, and execution
    /// picks up at the node after it.
    pub async fn resume(
        &self,
        run: &RunHandle,
        record: &SuspendRecord,
        resume_input: serde_json::Value,
        ctx: &StepContext,
    ) -> WorkflowResult<ExecutionOutcome> {
        let suspended = run.get_step_result(&record.step_id).ok_or_else(|| {
            WorkflowError::invalid_input(&record.step_id, "snapshot has no suspended step")
        })?;
        let input = suspended.payload.ok_or_else(|| {
            WorkflowError::invalid_input(&record.step_id, "suspended step lost its input")
        })?;
        let output = self.resume_output(record, &input, resume_input)?;

        run.transition(RunStatus::Running)?;
        let started_at = suspended.started_at.unwrap_or_else(Utc::now);
        run.record(StepResult::completed(&record.step_id, output, started_at))?;
        info!(run_id = %run.run_id(), step_id = %record.step_id, "Workflow resumed");
        self.execute(run, ctx).await
    }

    fn suspended_step(&self, step_id: &str) -> WorkflowResult<&Arc<dyn Step>> {
        let idx = self
            .graph
            .find(step_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("step '{step_id}'")))?;
        match &self.graph.node(idx).kind {
            NodeKind::Task { step, .. } => Ok(step),
            _ => Err(WorkflowError::invalid_input(step_id, "only tasks can suspend")),
        }
    }

    async fn execute(&self, run: &RunHandle, ctx: &StepContext) -> WorkflowResult<ExecutionOutcome> {
        if let Some(s) = self.walk(run, ctx, Some(self.graph.entry())).await? {
            return Ok(ExecutionOutcome::Suspended {
                record_id: s.record_id,
                step_id: s.step_id,
                payload: s.payload,
            });
        }

        let terminal = &self.graph.node(self.graph.terminal()).id;
        run.state()
            .output(terminal)
            .cloned()
            .map(ExecutionOutcome::Completed)
            .ok_or_else(|| WorkflowError::step_failed(terminal, "workflow produced no output"))
    }

    fn walk<'a>(
        &'a self,
        run: &'a RunHandle,
        ctx: &'a StepContext,
        start: Option<NodeIdx>,
    ) -> BoxFuture<'a, WorkflowResult<Option<Suspension>>> {
        Box::pin(async move {
            let mut cursor = start;
            while let Some(idx) = cursor {
                if ctx.cancel.is_cancelled() {
                    return Err(WorkflowError::Cancelled);
                }
                let node = self.graph.node(idx);

                match &node.kind {
                    NodeKind::Branch { .. } => {
                        let arm = self.decide_branch(run, ctx, idx)?;
                        if let Some(s) = self.walk(run, ctx, Some(arm)).await? {
                            return Ok(Some(s));
                        }
                    }
                    _ if run.state().is_settled(&node.id) => {
                        debug!(run_id = %run.run_id(), step_id = %node.id, "Skipping settled node");
                    }
                    NodeKind::Task { .. } => {
                        if let Some(s) = self.run_task(run, ctx, idx).await? {
                            return Ok(Some(s));
                        }
                    }
                    NodeKind::FanOut { .. } => self.run_fan_out(run, ctx, idx).await?,
                }

                cursor = node.next;
            }
            Ok(None)
        })
    }

    /// Evaluates the predicate once per run and returns the chosen arm's first node.
    fn decide_branch(
        &self,
        run: &RunHandle,
        ctx: &StepContext,
        idx: NodeIdx,
    ) -> WorkflowResult<NodeIdx> {
        let node = self.graph.node(idx);
        let NodeKind::Branch {
            ordinal,
            predicate,
            arms,
        } = &node.kind
        else {
            return Err(WorkflowError::step_failed(&node.id, "not a branch"));
        };

        let state = run.state();
        let recorded = match state.completed_payload(&node.id) {
            Some(StepPayload::BranchDecision { arm }) => Some(arm.clone()),
            _ => None,
        };
        let is_new = recorded.is_none();
        let arm = match recorded {
            Some(arm) => arm,
            None => predicate(&state)?,
        };

        let (_, target) = arms
            .iter()
            .find(|(name, _)| *name == arm)
            .ok_or_else(|| WorkflowError::step_failed(&node.id, format!("unknown arm '{arm}'")))?;

        if is_new {
            let now = Utc::now();
            run.record(StepResult::completed(
                &node.id,
                StepPayload::BranchDecision { arm: arm.clone() },
                now,
            ))?;
            for (name, start) in arms {
                if *name != arm {
                    for skipped in self.graph.chain_ids(*start) {
                        run.record(StepResult::skipped(skipped))?;
                    }
                }
            }
            info!(run_id = %run.run_id(), step_id = %node.id, arm = %arm, "Branch selected");
            ctx.events.send_manual_update(
                *ordinal,
                &format!("{}_selected", node.id),
                serde_json::json!({ "path": arm }),
            );
        }

        Ok(*target)
    }

    fn check_dependencies(
        &self,
        run: &RunHandle,
        step_id: &str,
        depends_on: &[String],
    ) -> WorkflowResult<()> {
        let state = run.state();
        match depends_on.iter().find(|dep| !state.is_completed(dep)) {
            Some(missing) => Err(WorkflowError::invalid_input(
                step_id,
                format!("dependency '{missing}' has not completed"),
            )),
            None => Ok(()),
        }
    }

    async fn run_task(
        &self,
        run: &RunHandle,
        ctx: &StepContext,
        idx: NodeIdx,
    ) -> WorkflowResult<Option<Suspension>> {
        let node = self.graph.node(idx);
        let NodeKind::Task {
            step,
            depends_on,
            input,
            critical,
        } = &node.kind
        else {
            return Err(WorkflowError::step_failed(&node.id, "not a task"));
        };

        let started_at = Utc::now();
        let prepared = self
            .check_dependencies(run, &node.id, depends_on)
            .and_then(|()| input(&run.state()))
            .and_then(|payload| step.validate_input(&payload).map(|()| payload));

        let result = match &prepared {
            Ok(payload) => {
                run.record(StepResult::running(&node.id, started_at))?;
                let span = info_span!("step", run_id = %run.run_id(), step_id = %node.id);
                execute_checked(step.as_ref(), payload, ctx)
                    .instrument(span)
                    .await
            }
            Err(err) => Err(err.clone()),
        };

        match result {
            Ok(StepOutcome::Completed(payload)) => {
                run.record(StepResult::completed(&node.id, payload, started_at))?;
                debug!(run_id = %run.run_id(), step_id = %node.id, "Step completed");
                Ok(None)
            }
            Ok(StepOutcome::Suspend(suspend_payload)) => {
                let Ok(input) = prepared else {
                    return Err(WorkflowError::step_failed(&node.id, "suspended without input"));
                };
                run.record(StepResult::suspended(&node.id, input, started_at))?;
                let snapshot = serde_json::to_value(run.snapshot())?;
                let owner = run.get().owner_id;
                let record_id = self
                    .suspend_store
                    .save(
                        run.run_id(),
                        owner.as_deref(),
                        &node.id,
                        snapshot,
                        suspend_payload.clone(),
                    )
                    .await?;
                if let Err(err) = run.transition(RunStatus::Suspended) {
                    // The run ended while the checkpoint was being written.
                    if let Err(discard) = self.suspend_store.discard(run.run_id()).await {
                        warn!(run_id = %run.run_id(), error = %discard, "Failed to discard suspend record");
                    }
                    return Err(err);
                }
                info!(run_id = %run.run_id(), step_id = %node.id, %record_id, "Workflow suspended");
                Ok(Some(Suspension {
                    record_id,
                    step_id: node.id.clone(),
                    payload: suspend_payload,
                }))
            }
            Err(err) => {
                let degraded = prepared
                    .as_ref()
                    .ok()
                    .and_then(|payload| step.degraded(payload, &err));
                run.record(StepResult::failed(
                    &node.id,
                    &err,
                    degraded.clone(),
                    started_at,
                ))?;

                if *critical {
                    warn!(run_id = %run.run_id(), step_id = %node.id, error = %err, "Critical step failed");
                    return Err(err);
                }
                warn!(
                    run_id = %run.run_id(),
                    step_id = %node.id,
                    error = %err,
                    degraded = degraded.is_some(),
                    "Step failed, continuing"
                );
                ctx.events.send_step_degraded(step.ordinal(), &node.id, &err);
                Ok(None)
            }
        }
    }

    /// Runs every branch concurrently and joins them all before folding.
    async fn run_fan_out(
        &self,
        run: &RunHandle,
        ctx: &StepContext,
        idx: NodeIdx,
    ) -> WorkflowResult<()> {
        let node = self.graph.node(idx);
        let NodeKind::FanOut {
            step,
            depends_on,
            expand,
            join,
        } = &node.kind
        else {
            return Err(WorkflowError::step_failed(&node.id, "not a fan-out"));
        };

        let started_at = Utc::now();
        let inputs = match self
            .check_dependencies(run, &node.id, depends_on)
            .and_then(|()| expand(&run.state()))
        {
            Ok(inputs) => inputs,
            Err(err) => {
                run.record(StepResult::failed(&node.id, &err, None, started_at))?;
                return Err(err);
            }
        };
        run.record(StepResult::running(&node.id, started_at))?;
        info!(run_id = %run.run_id(), step_id = %node.id, branches = inputs.len(), "Fan-out started");

        let mut outputs: Vec<Option<StepPayload>> = vec![None; inputs.len()];
        let mut branch_started = Vec::with_capacity(inputs.len());
        let mut branch_of_task = HashMap::new();
        let mut set = JoinSet::new();
        for (i, input) in inputs.iter().enumerate() {
            let branch_id = format!("{}.{i}", node.id);
            let started = Utc::now();
            run.record(StepResult::running(&branch_id, started))?;
            branch_started.push(started);

            let step = Arc::clone(step);
            let ctx = ctx.clone();
            let input = input.clone();
            let span = info_span!("step", run_id = %run.run_id(), step_id = %branch_id);
            let task = set.spawn(
                async move {
                    let result = match step.validate_input(&input) {
                        Ok(()) => execute_checked(step.as_ref(), &input, &ctx).await,
                        Err(err) => Err(err),
                    };
                    (i, result)
                }
                .instrument(span),
            );
            branch_of_task.insert(task.id(), i);
        }

        while let Some(joined) = set.join_next().await {
            let (i, result) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    let Some(&i) = branch_of_task.get(&join_err.id()) else {
                        continue;
                    };
                    warn!(run_id = %run.run_id(), step_id = %node.id, branch = i, error = %join_err, "Fan-out branch panicked");
                    let err = WorkflowError::step_failed(
                        format!("{}.{i}", node.id),
                        format!("branch panicked: {join_err}"),
                    );
                    (i, Err(err))
                }
            };
            let branch_id = format!("{}.{i}", node.id);
            let input = &inputs[i];

            let result = match result {
                Ok(StepOutcome::Suspend(_)) => Err(WorkflowError::step_failed(
                    &branch_id,
                    "fan-out branches cannot suspend",
                )),
                other => other,
            };

            match result {
                Ok(StepOutcome::Completed(payload)) => {
                    run.record(StepResult::completed(
                        &branch_id,
                        payload.clone(),
                        branch_started[i],
                    ))?;
                    outputs[i] = Some(payload);
                }
                Ok(StepOutcome::Suspend(_)) => {}
                Err(err) => {
                    let degraded = step.degraded(input, &err);
                    warn!(
                        run_id = %run.run_id(),
                        step_id = %branch_id,
                        error = %err,
                        "Fan-out branch degraded"
                    );
                    run.record(StepResult::failed(
                        &branch_id,
                        &err,
                        degraded.clone(),
                        branch_started[i],
                    ))?;
                    ctx.events.send_step_degraded(step.ordinal(), &branch_id, &err);
                    outputs[i] = degraded;
                }
            }
        }

        let joined = join(&run.state(), outputs.into_iter().flatten().collect());
        match joined {
            Ok(payload) => {
                run.record(StepResult::completed(&node.id, payload, started_at))?;
                info!(run_id = %run.run_id(), step_id = %node.id, "Fan-in complete");
                Ok(())
            }
            Err(err) => {
                run.record(StepResult::failed(&node.id, &err, None, started_at))?;
                Err(err)
            }
        }
    }
}

/// Executes a step and checks its output against the declared contract.
async fn execute_checked(
    step: &dyn Step,
    input: &StepPayload,
    ctx: &StepContext,
) -> WorkflowResult<StepOutcome> {
    let outcome = step.execute(input, ctx).await?;
    if let StepOutcome::Completed(payload) = &outcome {
        payload.expect_kind(step.id(), step.output_kind())?;
    }
    Ok(outcome)
}
