//! Workflow model and engine: steps, runs, the graph and its interpreter.

pub mod complexity;
pub mod engine;
pub mod graph;
pub mod run;
pub mod step;

pub use complexity::{SearchPath, classify, is_complex_query};
pub use engine::{ExecutionOutcome, INPUT_STEP_ID, WorkflowEngine};
pub use graph::{GraphBuilder, NodeIdx, WorkflowGraph};
pub use run::{Run, RunHandle, RunOutcome, RunSnapshot, RunState, RunStatus, StepResult, StepStatus};
pub use step::{
    PageContent, PayloadKind, RankedChunk, Source, Step, StepContext, StepOutcome, StepPayload,
};
